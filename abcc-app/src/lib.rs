mod app;
mod driver;
mod speed;

pub mod motor;

pub use self::app::{App, AppBuilder};
pub use self::driver::{loopback, Driver, FromDevice, LoopbackDriver, Network, RemapRequest};
pub use self::speed::SpeedTracker;
