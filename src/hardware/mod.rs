//! Hardware capabilities used by the controller and the temperature actor.
//!
//! Real implementations talk to Linux sysfs; simulated ones keep everything
//! in memory for `--fake-devices` runs and tests.

pub mod factory;
pub mod gpio;
pub mod simulated;
pub mod w1;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub use factory::{DeviceFactory, HardwareMode};
pub use gpio::SysfsGpio;
pub use simulated::{FixedTemperatureSensor, SimulatedPins};
pub use w1::W1TemperatureSensor;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO {pin}: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("pin {0} was not set up")]
    PinNotSetUp(u32),
    #[error("sensor {address}: {reason}")]
    Sensor { address: String, reason: String },
}

/// Relay outputs. Only the controller drives them.
#[async_trait]
pub trait PinController: Send + Sync {
    /// Configure `pin` as an output and switch it off.
    async fn setup(&self, pin: u32) -> Result<()>;
    async fn set_pin(&self, pin: u32, on: bool) -> Result<()>;
    async fn get_pin(&self, pin: u32) -> Result<bool>;
    /// Release every pin set up so far.
    async fn cleanup(&self) -> Result<()>;
}

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in °C.
    async fn read_celsius(&self) -> Result<f64>;
}
