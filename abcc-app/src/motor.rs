// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Electric motor speed control on top of the SPEED and REF_SPEED ADIs.

use abcc::{Adi, AdiStore, AnbState, Application, Error, Result};
use log::*;
use num_traits::ToPrimitive;

use crate::speed::SpeedTracker;

/// Declarations of the motor example: four UINT16 ADIs, a default map of
/// SPEED and REF_SPEED, and five assembly instances.
pub const MOTOR_CONFIG: &str = include_str!("../config/motor.toml");

pub const SPEED: &str = "SPEED";
pub const REF_SPEED: &str = "REF_SPEED";

pub struct MotorControl {
    speed: Adi<u16>,
    reference: Adi<u16>,
    max_speed: u16,
    tracker: SpeedTracker<u16>,
}

impl MotorControl {
    pub fn new(application: &Application, store: &AdiStore) -> Result<Self> {
        Self::with_names(application, store, SPEED, REF_SPEED)
    }

    pub fn with_names(application: &Application, store: &AdiStore,
                      speed: &str, reference: &str) -> Result<Self>
    {
        let lookup = |name: &str| {
            application.adis.find(name)
                .map(|entry| entry.instance)
                .ok_or_else(|| Error::UnknownAdiName(name.into()))
        };
        let speed = store.handle::<u16>(lookup(speed)?)?;
        let reference = store.handle::<u16>(lookup(reference)?)?;

        let (min, max) = store.properties(speed)
            .map(|p| (p.min.to_u16(), p.max.to_u16()))
            .unwrap_or((Some(0), Some(u16::MAX)));
        if min != Some(0) {
            return Err(Error::InvalidAdi {
                adi: speed.instance(),
                reason: "speed range must include the stop value 0".into(),
            });
        }
        let max_speed = max.unwrap_or(u16::MAX);
        debug!("motor control: speed ADI {}, reference ADI {}, max speed {}",
               speed.instance(), reference.instance(), max_speed);

        Ok(MotorControl { speed, reference, max_speed, tracker: SpeedTracker::new() })
    }

    pub fn speed(&self) -> u16 {
        self.tracker.current()
    }

    /// The cyclic callback: follow the reference speed while the network is
    /// process active, stop otherwise.
    pub fn cycle(&mut self, state: AnbState, store: &mut AdiStore) {
        let reference = store.get(self.reference).min(self.max_speed);
        let speed = self.tracker.step(state, reference);
        if let Err(e) = store.set(self.speed, speed) {
            warn!("could not store speed: {}", e);
        }
    }
}

#[cfg(test)]
fn motor_setup(config: &str) -> (Application, AdiStore) {
    let app: Application = config.parse().unwrap();
    let store = AdiStore::new(&app.adis);
    (app, store)
}

#[test]
fn test_motor_config() {
    let (app, _) = motor_setup(MOTOR_CONFIG);
    assert_eq!(app.adis.len(), 4);
    assert_eq!(app.default_map.len(), 2);
    assert_eq!(app.assemblies.len(), 5);
    let eip = app.ethernet_ip.unwrap();
    assert_eq!(eip.producing_attribute(), b"\x64\x00\x65\x00\x66\x00");
    assert_eq!(eip.consuming_attribute(), b"\x96\x00\x97\x00");
}

#[test]
fn test_motor_cycle() {
    let (app, mut store) = motor_setup(MOTOR_CONFIG);
    let mut motor = MotorControl::new(&app, &store).unwrap();
    let reference = store.handle::<u16>(2).unwrap();
    let speed = store.handle::<u16>(1).unwrap();

    store.set(reference, 3).unwrap();
    for _ in 0..5 {
        motor.cycle(AnbState::ProcessActive, &mut store);
    }
    assert_eq!(motor.speed(), 3);
    assert_eq!(store.get(speed), 3);

    motor.cycle(AnbState::Idle, &mut store);
    assert_eq!(store.get(speed), 0);
}

#[test]
fn test_motor_speed_limit() {
    let config = MOTOR_CONFIG.replacen("max = 0xFFFF", "max = 2", 1);
    let (app, mut store) = motor_setup(&config);
    let mut motor = MotorControl::new(&app, &store).unwrap();
    let reference = store.handle::<u16>(2).unwrap();
    store.set(reference, 10).unwrap();
    for _ in 0..10 {
        motor.cycle(AnbState::ProcessActive, &mut store);
    }
    assert_eq!(motor.speed(), 2);
}

#[test]
fn test_motor_setup_errors() {
    let (app, store) = motor_setup(MOTOR_CONFIG);
    assert!(matches!(
        MotorControl::with_names(&app, &store, "VELOCITY", REF_SPEED),
        Err(Error::UnknownAdiName(_))
    ));

    let config = MOTOR_CONFIG.replacen("min = 0", "min = 10", 1)
        .replacen("default = 0", "default = 10", 1);
    let (app, store) = motor_setup(&config);
    assert!(matches!(
        MotorControl::new(&app, &store),
        Err(Error::InvalidAdi { adi: 1, .. })
    ));
}
