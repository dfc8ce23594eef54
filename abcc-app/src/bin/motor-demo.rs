// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Runs the motor speed example against a simulated network controller.

use abcc::{AnbState, Application};
use abcc_app::motor::MotorControl;
use abcc_app::{loopback, AppBuilder, FromDevice, Network};
use byteorder::{ByteOrder, LittleEndian as LE};
use clap::Parser;
use std::{io, path::PathBuf, thread::{self, JoinHandle}, time::Duration};

#[derive(Parser)]
#[command(about = "Motor speed control over a loopback ABCC network")]
struct Args {
    /// Application config (TOML); the built-in motor example if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of cycles to run.
    #[arg(long, default_value_t = 300)]
    cycles: usize,
    /// Cycle frequency in Hz.
    #[arg(long, default_value_t = 100)]
    freq: u32,
    /// Reference speed sent by the controller.
    #[arg(long, default_value_t = 100)]
    reference: u16,
    #[arg(short, long)]
    verbose: bool,
}

/// Plays the fieldbus controller: goes process active, commands the
/// reference speed, and drops back to idle after `idle_after` cycles.
fn controller(network: Network, read_size: usize, reference: u16, idle_after: usize) {
    network.set_state(AnbState::WaitProcess);
    let mut image = vec![0u8; read_size.max(2)];
    LE::write_u16(&mut image, reference);
    if network.send_read_image(image).is_err() {
        return;
    }
    network.set_state(AnbState::ProcessActive);

    let mut cycle = 0;
    while let Some(msg) = network.recv_timeout(Duration::from_secs(1)) {
        if let FromDevice::WriteImage(image) = msg {
            cycle += 1;
            if image.len() >= 2 && cycle % 25 == 0 {
                log::info!("controller: cycle {}, speed {}", cycle, LE::read_u16(&image));
            }
            if cycle == idle_after {
                log::info!("controller: going idle");
                network.set_state(AnbState::Idle);
            }
        }
    }
}

/// Waits for the controller thread; returns false if it panicked.
fn join_controller(ctl: JoinHandle<()>) -> bool {
    match ctl.join() {
        Ok(()) => true,
        Err(e) => {
            let msg = e.downcast_ref::<&str>().copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            log::warn!("controller thread panicked: {}", msg);
            false
        }
    }
}

pub fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let application = match &args.config {
        Some(path) => Application::load(path)?,
        None => abcc_app::motor::MOTOR_CONFIG.parse::<Application>()?,
    };

    let (driver, network) = loopback();
    let mut app = AppBuilder::new("motor-demo")
        .cycle_freq(args.freq)
        .build(application, driver)?;
    let mut motor = MotorControl::new(app.application(), app.store())?;

    let read_size = app.layout(abcc::PdDirection::Read).size();
    let (reference, idle_after) = (args.reference, args.cycles * 3 / 4);
    let ctl = thread::spawn(move || controller(network, read_size, reference, idle_after));

    app.run_cycles(args.cycles, |state, store| motor.cycle(state, store))?;
    log::info!("final speed {} in state {:?}", motor.speed(), app.state());
    drop(app);
    join_controller(ctl);
    Ok(())
}

#[test]
fn test_join_controller() {
    assert!(join_controller(thread::spawn(|| ())));
    assert!(!join_controller(thread::spawn(|| panic!("controller failed"))));
}
