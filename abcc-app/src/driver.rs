// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The boundary to the network interface driver, and an in-process loopback
//! implementation whose network side can be driven from another thread.

use abcc::{AnbState, Error, PdDirection, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::*;
use std::{
    collections::VecDeque,
    convert::TryFrom,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

/// A request from the network to switch one direction's process data to
/// an assembly instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapRequest {
    pub direction: PdDirection,
    /// Index among the process data mappable assemblies of `direction`.
    pub assembly: usize,
}

pub trait Driver {
    /// Current network state.
    fn anb_state(&self) -> AnbState;

    /// Copies newly received read process data into `image`. Returns false
    /// if nothing arrived since the last call.
    fn receive(&mut self, image: &mut [u8]) -> Result<bool>;

    /// Hands the write process data of this cycle to the network.
    fn send(&mut self, image: &[u8]) -> Result<()>;

    fn poll_remap(&mut self) -> Option<RemapRequest> {
        None
    }

    /// Reports the outcome of a remap request returned by `poll_remap`.
    fn remap_done(&mut self, _request: RemapRequest, _accepted: bool) {}
}

enum ToDevice {
    ReadImage(Vec<u8>),
    Remap(RemapRequest),
}

/// What the device sends back to the network side of a loopback driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromDevice {
    WriteImage(Vec<u8>),
    RemapDone(RemapRequest, bool),
}

/// Device side of a loopback connection.
pub struct LoopbackDriver {
    state: Arc<AtomicU8>,
    from_network: Receiver<ToDevice>,
    to_network: Sender<FromDevice>,
    latest: Option<Vec<u8>>,
    remaps: VecDeque<RemapRequest>,
}

/// Network side of a loopback connection, standing in for the fieldbus
/// controller.
pub struct Network {
    state: Arc<AtomicU8>,
    to_device: Sender<ToDevice>,
    from_device: Receiver<FromDevice>,
}

/// Creates a connected pair of driver and network ends.
pub fn loopback() -> (LoopbackDriver, Network) {
    let state = Arc::new(AtomicU8::new(AnbState::Setup.code()));
    let (w_to_device, r_to_device) = unbounded();
    let (w_from_device, r_from_device) = unbounded();
    let driver = LoopbackDriver {
        state: state.clone(),
        from_network: r_to_device,
        to_network: w_from_device,
        latest: None,
        remaps: VecDeque::new(),
    };
    let network = Network {
        state,
        to_device: w_to_device,
        from_device: r_from_device,
    };
    (driver, network)
}

impl LoopbackDriver {
    /// Sorts everything the network sent into the latest read image and
    /// the queue of remap requests.
    fn drain(&mut self) -> Result<()> {
        loop {
            match self.from_network.try_recv() {
                Ok(ToDevice::ReadImage(data)) => self.latest = Some(data),
                Ok(ToDevice::Remap(req)) => self.remaps.push_back(req),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(Error::Disconnected),
            }
        }
    }
}

impl Driver for LoopbackDriver {
    fn anb_state(&self) -> AnbState {
        AnbState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(AnbState::Exception)
    }

    fn receive(&mut self, image: &mut [u8]) -> Result<bool> {
        self.drain()?;
        match self.latest.take() {
            None => Ok(false),
            Some(data) if data.len() < image.len() => Err(Error::ImageSize {
                need: image.len(),
                got: data.len(),
            }),
            Some(data) => {
                image.copy_from_slice(&data[..image.len()]);
                Ok(true)
            }
        }
    }

    fn send(&mut self, image: &[u8]) -> Result<()> {
        self.to_network
            .send(FromDevice::WriteImage(image.to_vec()))
            .map_err(|_| Error::Disconnected)
    }

    fn poll_remap(&mut self) -> Option<RemapRequest> {
        // a disconnect is reported by the next receive
        let _ = self.drain();
        self.remaps.pop_front()
    }

    fn remap_done(&mut self, request: RemapRequest, accepted: bool) {
        if self.to_network.send(FromDevice::RemapDone(request, accepted)).is_err() {
            warn!("network side gone, remap response dropped");
        }
    }
}

impl Network {
    pub fn set_state(&self, state: AnbState) {
        self.state.store(state.code(), Ordering::Release);
    }

    pub fn state(&self) -> AnbState {
        AnbState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(AnbState::Exception)
    }

    pub fn send_read_image(&self, image: Vec<u8>) -> Result<()> {
        self.to_device
            .send(ToDevice::ReadImage(image))
            .map_err(|_| Error::Disconnected)
    }

    pub fn request_remap(&self, direction: PdDirection, assembly: usize) -> Result<()> {
        self.to_device
            .send(ToDevice::Remap(RemapRequest { direction, assembly }))
            .map_err(|_| Error::Disconnected)
    }

    /// Next message from the device, if one arrives within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FromDevice> {
        match self.from_device.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All messages that have already arrived.
    pub fn drain(&self) -> Vec<FromDevice> {
        self.from_device.try_iter().collect()
    }

    /// The most recent write image among the messages that have arrived.
    pub fn latest_write_image(&self) -> Option<Vec<u8>> {
        self.drain().into_iter().rev().find_map(|msg| match msg {
            FromDevice::WriteImage(image) => Some(image),
            _ => None,
        })
    }
}

#[test]
fn test_loopback_images() {
    let (mut driver, network) = loopback();
    assert_eq!(driver.anb_state(), AnbState::Setup);
    network.set_state(AnbState::ProcessActive);
    assert_eq!(driver.anb_state(), AnbState::ProcessActive);

    let mut image = [0u8; 2];
    assert!(!driver.receive(&mut image).unwrap());
    network.send_read_image(vec![1, 2]).unwrap();
    network.send_read_image(vec![3, 4]).unwrap();
    assert!(driver.receive(&mut image).unwrap());
    assert_eq!(image, [3, 4]);

    network.send_read_image(vec![5]).unwrap();
    assert!(matches!(
        driver.receive(&mut image),
        Err(Error::ImageSize { need: 2, got: 1 })
    ));

    driver.send(&[7, 8]).unwrap();
    driver.send(&[9, 10]).unwrap();
    assert_eq!(network.latest_write_image(), Some(vec![9, 10]));
    assert_eq!(network.latest_write_image(), None);
}

#[test]
fn test_loopback_remap() {
    let (mut driver, network) = loopback();
    assert_eq!(driver.poll_remap(), None);
    network.request_remap(PdDirection::Write, 2).unwrap();
    network.send_read_image(vec![1]).unwrap();
    let req = driver.poll_remap().unwrap();
    assert_eq!(driver.poll_remap(), None);
    // the image that arrived together with the request is kept
    let mut image = [0u8; 1];
    assert!(driver.receive(&mut image).unwrap());
    assert_eq!(image, [1]);
    assert_eq!(req, RemapRequest { direction: PdDirection::Write, assembly: 2 });
    driver.remap_done(req, true);
    assert_eq!(
        network.recv_timeout(Duration::from_millis(10)),
        Some(FromDevice::RemapDone(req, true))
    );
}

#[test]
fn test_loopback_disconnect() {
    let (mut driver, network) = loopback();
    drop(network);
    assert!(matches!(driver.receive(&mut [0u8; 2]), Err(Error::Disconnected)));
    assert!(matches!(driver.send(&[0]), Err(Error::Disconnected)));
}
