use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

use super::{HardwareError, PinController, TemperatureSensor};

/// In-memory relay board that records every actuation.
#[derive(Debug, Default)]
pub struct SimulatedPins {
    levels: Mutex<HashMap<u32, bool>>,
    history: Mutex<Vec<(u32, bool)>>,
    fail_writes: Mutex<bool>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `set_pin` call so far, in order. `setup` is not recorded.
    pub fn history(&self) -> Vec<(u32, bool)> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn level(&self, pin: u32) -> Option<bool> {
        self.levels.lock().get(&pin).copied()
    }

    /// Make every following `set_pin` fail, to exercise actuation errors.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

#[async_trait]
impl PinController for SimulatedPins {
    async fn setup(&self, pin: u32) -> Result<()> {
        self.levels.lock().insert(pin, false);
        Ok(())
    }

    async fn set_pin(&self, pin: u32, on: bool) -> Result<()> {
        if *self.fail_writes.lock() {
            anyhow::bail!(HardwareError::Gpio {
                pin,
                source: std::io::Error::other("simulated write failure"),
            });
        }
        let mut levels = self.levels.lock();
        let level = levels.get_mut(&pin).ok_or(HardwareError::PinNotSetUp(pin))?;
        *level = on;
        self.history.lock().push((pin, on));
        info!(pin, on, "simulated pin set");
        Ok(())
    }

    async fn get_pin(&self, pin: u32) -> Result<bool> {
        Ok(self
            .levels
            .lock()
            .get(&pin)
            .copied()
            .ok_or(HardwareError::PinNotSetUp(pin))?)
    }

    async fn cleanup(&self) -> Result<()> {
        self.levels.lock().clear();
        Ok(())
    }
}

/// Sensor returning a constant, or failing when built with [`Self::failing`].
#[derive(Debug, Clone)]
pub struct FixedTemperatureSensor {
    celsius: Option<f64>,
}

impl FixedTemperatureSensor {
    pub fn new(celsius: f64) -> Self {
        Self {
            celsius: Some(celsius),
        }
    }

    pub fn failing() -> Self {
        Self { celsius: None }
    }
}

#[async_trait]
impl TemperatureSensor for FixedTemperatureSensor {
    async fn read_celsius(&self) -> Result<f64> {
        self.celsius.ok_or_else(|| {
            HardwareError::Sensor {
                address: "simulated".to_string(),
                reason: "no reading".to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_history() {
        let pins = SimulatedPins::new();
        pins.setup(1).await.unwrap();
        pins.setup(2).await.unwrap();
        pins.set_pin(2, true).await.unwrap();
        pins.set_pin(1, true).await.unwrap();
        pins.set_pin(2, false).await.unwrap();

        assert_eq!(pins.history(), vec![(2, true), (1, true), (2, false)]);
        assert_eq!(pins.level(1), Some(true));
        assert!(!pins.get_pin(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_pin_rejected() {
        let pins = SimulatedPins::new();
        assert!(pins.set_pin(9, true).await.is_err());
        assert!(pins.get_pin(9).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let pins = SimulatedPins::new();
        pins.setup(1).await.unwrap();
        pins.fail_writes(true);
        assert!(pins.set_pin(1, true).await.is_err());
        assert!(pins.history().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_sensor() {
        assert_eq!(FixedTemperatureSensor::new(56.7).read_celsius().await.unwrap(), 56.7);
        assert!(FixedTemperatureSensor::failing().read_celsius().await.is_err());
    }
}
