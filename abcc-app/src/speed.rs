// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use abcc::AnbState;
use num_traits::{PrimInt, Unsigned};

/// The speed of a motor, moved toward a reference speed by one unit per
/// cycle while the network is process active, and held at zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedTracker<T = u16> {
    current: T,
}

impl<T: PrimInt + Unsigned> Default for SpeedTracker<T> {
    fn default() -> Self {
        SpeedTracker { current: T::zero() }
    }
}

impl<T: PrimInt + Unsigned> SpeedTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> T {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = T::zero();
    }

    /// Performs one cycle's update and returns the new speed.
    pub fn step(&mut self, state: AnbState, reference: T) -> T {
        if !state.is_process_active() {
            // the motor must not run without a healthy connection
            self.current = T::zero();
        } else if self.current > reference {
            self.current = self.current.saturating_sub(T::one());
        } else if self.current < reference {
            self.current = self.current.saturating_add(T::one());
        }
        self.current
    }
}

#[cfg(test)]
fn tracker_at(current: u16) -> SpeedTracker {
    SpeedTracker { current }
}

#[test]
fn test_accelerate() {
    let mut t: SpeedTracker = SpeedTracker::new();
    assert_eq!(t.step(AnbState::ProcessActive, 100), 1);
    for _ in 1..100 {
        t.step(AnbState::ProcessActive, 100);
    }
    assert_eq!(t.current(), 100);
    assert_eq!(t.step(AnbState::ProcessActive, 100), 100);
}

#[test]
fn test_hold_at_reference() {
    let mut t = tracker_at(50);
    for _ in 0..10 {
        assert_eq!(t.step(AnbState::ProcessActive, 50), 50);
    }
}

#[test]
fn test_stop_when_not_active() {
    let mut t = tracker_at(50);
    assert_eq!(t.step(AnbState::Idle, 0), 0);

    for state in [
        AnbState::Setup,
        AnbState::NwInit,
        AnbState::WaitProcess,
        AnbState::Idle,
        AnbState::Error,
        AnbState::Exception,
    ]
    .iter()
    {
        let mut t = tracker_at(u16::MAX);
        assert_eq!(t.step(*state, u16::MAX), 0);
    }
}

#[test]
fn test_decelerate() {
    let mut t = tracker_at(10);
    assert_eq!(t.step(AnbState::ProcessActive, 5), 9);
    for _ in 1..5 {
        t.step(AnbState::ProcessActive, 5);
    }
    assert_eq!(t.current(), 5);
}

#[test]
fn test_single_step_toward_reference() {
    let samples = [0u16, 1, 2, 99, 100, 32767, 65534, 65535];
    for &current in &samples {
        for &reference in &samples {
            let mut t = tracker_at(current);
            let new = t.step(AnbState::ProcessActive, reference);
            let dist = |v: u16| (v as i32 - reference as i32).abs();
            assert!((new as i32 - current as i32).abs() <= 1);
            if current == reference {
                assert_eq!(new, current);
            } else {
                assert!(dist(new) < dist(current));
            }
        }
    }
}

#[test]
fn test_convergence_steps() {
    for &(start, reference) in &[(0u16, 1000u16), (1000, 0), (65535, 65000), (7, 7)] {
        let mut t = tracker_at(start);
        let steps = (start as i32 - reference as i32).abs();
        for n in 0..steps {
            assert_ne!(t.current(), reference, "converged early after {} steps", n);
            t.step(AnbState::ProcessActive, reference);
        }
        assert_eq!(t.current(), reference);
    }
}

#[test]
fn test_wider_types() {
    let mut t = SpeedTracker::<u32>::new();
    assert_eq!(t.step(AnbState::ProcessActive, 100_000), 1);
    t.current = u32::MAX;
    assert_eq!(t.step(AnbState::ProcessActive, u32::MAX), u32::MAX);
    assert_eq!(t.step(AnbState::ProcessActive, 0), u32::MAX - 1);
    t.reset();
    assert_eq!(t.current(), 0);
}
