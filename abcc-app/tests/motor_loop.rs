// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use abcc::{AnbState, Application, Error, PdDirection};
use abcc_app::motor::{MotorControl, MOTOR_CONFIG};
use abcc_app::{loopback, App, AppBuilder, FromDevice, LoopbackDriver, Network, RemapRequest};
use byteorder::{ByteOrder, LittleEndian as LE};

fn setup() -> (App<LoopbackDriver>, MotorControl, Network) {
    let application: Application = MOTOR_CONFIG.parse().unwrap();
    let (driver, network) = loopback();
    let app = AppBuilder::new("test").build(application, driver).unwrap();
    let motor = MotorControl::new(app.application(), app.store()).unwrap();
    (app, motor, network)
}

fn command(network: &Network, reference: u16) {
    let mut image = vec![0; 2];
    LE::write_u16(&mut image, reference);
    network.send_read_image(image).unwrap();
}

fn cycles(app: &mut App<LoopbackDriver>, motor: &mut MotorControl, n: usize) {
    for _ in 0..n {
        app.single_cycle(|state, store| motor.cycle(state, store)).unwrap();
    }
}

fn reported_speed(network: &Network) -> u16 {
    LE::read_u16(&network.latest_write_image().expect("no write image"))
}

#[test]
fn accelerate_to_reference() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    command(&network, 100);

    cycles(&mut app, &mut motor, 1);
    assert_eq!(reported_speed(&network), 1);
    cycles(&mut app, &mut motor, 99);
    assert_eq!(reported_speed(&network), 100);
    cycles(&mut app, &mut motor, 10);
    assert_eq!(reported_speed(&network), 100);
}

#[test]
fn decelerate_to_reference() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    command(&network, 10);
    cycles(&mut app, &mut motor, 10);
    assert_eq!(motor.speed(), 10);

    command(&network, 5);
    cycles(&mut app, &mut motor, 1);
    assert_eq!(reported_speed(&network), 9);
    cycles(&mut app, &mut motor, 4);
    assert_eq!(reported_speed(&network), 5);
}

#[test]
fn stop_when_leaving_process_active() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    command(&network, 50);
    cycles(&mut app, &mut motor, 50);
    assert_eq!(reported_speed(&network), 50);

    network.set_state(AnbState::Idle);
    cycles(&mut app, &mut motor, 1);
    assert_eq!(app.state(), AnbState::Idle);
    assert_eq!(reported_speed(&network), 0);

    // the reference is kept; the motor starts over once active again
    network.set_state(AnbState::ProcessActive);
    cycles(&mut app, &mut motor, 3);
    assert_eq!(reported_speed(&network), 3);
}

#[test]
fn no_motion_before_process_active() {
    let (mut app, mut motor, network) = setup();
    command(&network, 1000);
    for state in &[AnbState::Setup, AnbState::NwInit, AnbState::WaitProcess] {
        network.set_state(*state);
        cycles(&mut app, &mut motor, 5);
        assert_eq!(reported_speed(&network), 0);
    }
}

#[test]
fn remap_to_assemblies() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::Idle);
    network.request_remap(PdDirection::Write, 0).unwrap();
    network.request_remap(PdDirection::Read, 0).unwrap();
    cycles(&mut app, &mut motor, 1);
    assert_eq!(app.layout(PdDirection::Write).size(), 4);
    assert_eq!(app.layout(PdDirection::Read).size(), 4);

    let msgs = network.drain();
    let done = |direction| FromDevice::RemapDone(RemapRequest { direction, assembly: 0 }, true);
    assert!(msgs.contains(&done(PdDirection::Write)));
    assert!(msgs.contains(&done(PdDirection::Read)));

    // speed and torque go out, reference speed and torque come in
    network.set_state(AnbState::ProcessActive);
    network.send_read_image(vec![2, 0, 7, 0]).unwrap();
    cycles(&mut app, &mut motor, 3);
    assert_eq!(network.latest_write_image(), Some(vec![2, 0, 0, 0]));
}

#[test]
fn remap_refused_while_active() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    network.request_remap(PdDirection::Write, 2).unwrap();
    network.request_remap(PdDirection::Read, 5).unwrap();
    cycles(&mut app, &mut motor, 1);
    assert_eq!(app.layout(PdDirection::Write).size(), 2);
    assert!(matches!(app.remap(PdDirection::Write, 2), Err(Error::RemapWhileActive)));

    let refused: Vec<_> = network
        .drain()
        .into_iter()
        .filter(|m| matches!(m, FromDevice::RemapDone(_, false)))
        .collect();
    assert_eq!(refused.len(), 2);
}

#[test]
fn wrong_image_size_is_reported() {
    let (mut app, mut motor, network) = setup();
    network.send_read_image(vec![1]).unwrap();
    let res = app.single_cycle(|state, store| motor.cycle(state, store));
    assert!(matches!(res, Err(Error::ImageSize { need: 2, got: 1 })));
    // the cycle still ran and sent its write image
    assert_eq!(network.latest_write_image(), Some(vec![0, 0]));
}

#[test]
fn stop_despite_bad_read_images() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    command(&network, 50);
    cycles(&mut app, &mut motor, 50);
    assert_eq!(reported_speed(&network), 50);

    network.set_state(AnbState::Idle);
    for _ in 0..10 {
        network.send_read_image(vec![1]).unwrap();
        let res = app.single_cycle(|state, store| motor.cycle(state, store));
        assert!(matches!(res, Err(Error::ImageSize { need: 2, got: 1 })));
        assert_eq!(reported_speed(&network), 0);
    }
    assert_eq!(motor.speed(), 0);
}

#[test]
fn stop_despite_old_size_images_after_remap() {
    let (mut app, mut motor, network) = setup();
    network.set_state(AnbState::ProcessActive);
    command(&network, 50);
    cycles(&mut app, &mut motor, 50);
    assert_eq!(reported_speed(&network), 50);

    // the read map grows to 4 bytes, but the network keeps sending 2
    network.set_state(AnbState::Idle);
    network.request_remap(PdDirection::Read, 0).unwrap();
    for _ in 0..5 {
        command(&network, 50);
        let res = app.single_cycle(|state, store| motor.cycle(state, store));
        assert!(matches!(res, Err(Error::ImageSize { need: 4, got: 2 })));
        assert_eq!(reported_speed(&network), 0);
    }
    assert_eq!(app.layout(PdDirection::Read).size(), 4);
}

#[test]
fn run_stops_on_disconnect() {
    let (driver, network) = loopback();
    let application: Application = MOTOR_CONFIG.parse().unwrap();
    let mut app = AppBuilder::new("test").cycle_freq(1000).build(application, driver).unwrap();
    network.set_state(AnbState::ProcessActive);
    app.run_cycles(3, |_, _| ()).unwrap();
    drop(network);
    assert!(matches!(app.run(|_, _| ()), Err(Error::Disconnected)));
}
