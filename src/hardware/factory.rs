use std::sync::Arc;

use super::{
    FixedTemperatureSensor, PinController, SimulatedPins, SysfsGpio, TemperatureSensor,
    W1TemperatureSensor,
};
use crate::config::Config;

/// Temperature reported by the simulated boiler probe.
pub const SIMULATED_TEMPERATURE_C: f64 = 56.7;

/// Hardware mode configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    /// Relays and probe through Linux sysfs
    Sysfs,
    /// In-memory devices for development and testing
    Simulated,
}

impl HardwareMode {
    pub fn from_flag(fake_devices: bool) -> Self {
        if fake_devices {
            HardwareMode::Simulated
        } else {
            HardwareMode::Sysfs
        }
    }
}

/// Factory for creating hardware device instances
pub struct DeviceFactory {
    mode: HardwareMode,
}

impl DeviceFactory {
    pub fn new(mode: HardwareMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    pub fn create_pins(&self) -> Arc<dyn PinController> {
        match self.mode {
            HardwareMode::Sysfs => Arc::new(SysfsGpio::new()),
            HardwareMode::Simulated => Arc::new(SimulatedPins::new()),
        }
    }

    pub fn create_temperature_sensor(&self, cfg: &Config) -> Arc<dyn TemperatureSensor> {
        match self.mode {
            HardwareMode::Sysfs => {
                Arc::new(W1TemperatureSensor::new(cfg.temperature.address.clone()))
            }
            HardwareMode::Simulated => {
                Arc::new(FixedTemperatureSensor::new(SIMULATED_TEMPERATURE_C))
            }
        }
    }
}
