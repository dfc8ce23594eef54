// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Wrap a network driver and the application's data declarations and
//! provide a PLC-like environment for cyclic task execution.

use std::{thread, time::Duration};
use time::precise_time_ns;
use log::*;

use abcc::{image, AdiStore, AnbState, Application, Error, Layout, PdDirection, Result};

use crate::driver::Driver;

#[derive(Default)]
pub struct AppBuilder {
    name: String,
    cycle_freq: Option<u32>,
}

impl AppBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            .. Self::default()
        }
    }

    pub fn cycle_freq(mut self, freq: u32) -> Self {
        self.cycle_freq = Some(freq);
        self
    }

    pub fn build<D: Driver>(self, application: Application, driver: D) -> Result<App<D>> {
        let adis = &application.adis;
        application.default_map.validate(adis)?;
        let write_layout = application.default_map.layout(adis, PdDirection::Write)?;
        let read_layout = application.default_map.layout(adis, PdDirection::Read)?;
        let store = AdiStore::new(adis);

        info!("{}: {} ADI(s), write process data {} bytes, read process data {} bytes",
              self.name, adis.len(), write_layout.size(), read_layout.size());

        Ok(App {
            write_image: vec![0; write_layout.size()],
            read_image: vec![0; read_layout.size()],
            name: self.name,
            application,
            store,
            driver,
            write_layout,
            read_layout,
            state: None,
            last_error: None,
            sleep: 1000_000_000 / self.cycle_freq.unwrap_or(1000).max(1) as u64,
        })
    }
}


pub struct App<D> {
    name: String,
    application: Application,
    store: AdiStore,
    driver: D,
    write_layout: Layout,
    read_layout: Layout,
    write_image: Vec<u8>,
    read_image: Vec<u8>,
    state: Option<AnbState>,
    last_error: Option<String>,
    sleep: u64,
}

impl<D: Driver> App<D> {
    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn store(&self) -> &AdiStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AdiStore {
        &mut self.store
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The network state seen in the last cycle.
    pub fn state(&self) -> AnbState {
        self.state.unwrap_or_default()
    }

    pub fn layout(&self, direction: PdDirection) -> &Layout {
        match direction {
            PdDirection::Write => &self.write_layout,
            PdDirection::Read => &self.read_layout,
        }
    }

    /// Switches one direction's process data to an assembly instance. Not
    /// possible while process data is being exchanged.
    pub fn remap(&mut self, direction: PdDirection, assembly: usize) -> Result<()> {
        if self.state().is_process_active() {
            return Err(Error::RemapWhileActive);
        }
        let asm = self.application.assemblies.select(direction, assembly)?;
        let layout = asm.map.layout(&self.application.adis, direction)?;
        info!("{}: {} process data remapped to '{}' ({} bytes)",
              self.name, direction, asm.name, layout.size());
        match direction {
            PdDirection::Write => {
                self.write_image = vec![0; layout.size()];
                self.write_layout = layout;
            }
            PdDirection::Read => {
                self.read_image = vec![0; layout.size()];
                self.read_layout = layout;
            }
        }
        Ok(())
    }

    /// Runs cycles until the driver disconnects.
    pub fn run<F>(&mut self, mut cycle_fn: F) -> Result<()>
    where F: FnMut(AnbState, &mut AdiStore)
    {
        let mut cycle_start = precise_time_ns();
        loop {
            self.paced_cycle(&mut cycle_fn, &mut cycle_start)?;
        }
    }

    /// Runs a fixed number of cycles at the configured frequency.
    pub fn run_cycles<F>(&mut self, cycles: usize, mut cycle_fn: F) -> Result<()>
    where F: FnMut(AnbState, &mut AdiStore)
    {
        let mut cycle_start = precise_time_ns();
        for _ in 0..cycles {
            self.paced_cycle(&mut cycle_fn, &mut cycle_start)?;
        }
        Ok(())
    }

    fn paced_cycle<F>(&mut self, cycle_fn: F, cycle_start: &mut u64) -> Result<()>
    where F: FnMut(AnbState, &mut AdiStore)
    {
        match self.single_cycle(cycle_fn) {
            Err(Error::Disconnected) => {
                warn!("{}: network driver disconnected", self.name);
                return Err(Error::Disconnected);
            }
            Err(e) => {
                // only log when the error changes, it may repeat every cycle
                let msg = e.to_string();
                if self.last_error.as_ref() != Some(&msg) {
                    warn!("error in cycle: {}", msg);
                    self.last_error = Some(msg);
                }
            }
            Ok(()) => self.last_error = None,
        }

        // wait until next cycle
        let now = precise_time_ns();
        *cycle_start += self.sleep;
        if *cycle_start > now {
            thread::sleep(Duration::from_nanos(*cycle_start - now));
        }
        Ok(())
    }

    /// One cycle: query the network state, handle remap requests, take over
    /// received process data, run the application logic, and send the
    /// write process data.
    ///
    /// The application logic and the send run even if receiving failed, so
    /// that it can bring its outputs into a safe state. The first error of
    /// the cycle is returned.
    pub fn single_cycle<F>(&mut self, mut cycle_fn: F) -> Result<()>
    where F: FnMut(AnbState, &mut AdiStore)
    {
        let state = self.driver.anb_state();
        if self.state != Some(state) {
            info!("{}: network state {:?}", self.name, state);
            self.state = Some(state);
        }

        while let Some(req) = self.driver.poll_remap() {
            let res = self.remap(req.direction, req.assembly);
            if let Err(e) = &res {
                warn!("{}: remap to {} assembly {} refused: {}",
                      self.name, req.direction, req.assembly, e);
            }
            self.driver.remap_done(req, res.is_ok());
        }

        let input = match self.driver.receive(&mut self.read_image) {
            Ok(true) => image::unpack(&self.read_layout, &self.read_image, &mut self.store)
                .map(|_| ()),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        cycle_fn(state, &mut self.store);

        let output = match image::pack(&self.write_layout, &self.store, &mut self.write_image) {
            Ok(()) => self.driver.send(&self.write_image),
            Err(e) => Err(e),
        };
        input.and(output)
    }
}
