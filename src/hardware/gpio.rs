use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{HardwareError, PinController};

/// Relay board driven through `/sys/class/gpio`.
///
/// The relays are active-low: switching a load on drives the line LOW.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    exported: Mutex<BTreeSet<u32>>,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::with_root("/sys/class/gpio")
    }

    /// Use another sysfs root, mostly for tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: Mutex::new(BTreeSet::new()),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    async fn write(&self, pin: u32, path: PathBuf, value: &str) -> Result<()> {
        tokio::fs::write(&path, value)
            .await
            .map_err(|source| HardwareError::Gpio { pin, source })?;
        Ok(())
    }

    fn ensure_exported(&self, pin: u32) -> Result<()> {
        if !self.exported.lock().contains(&pin) {
            return Err(HardwareError::PinNotSetUp(pin).into());
        }
        Ok(())
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

fn level(on: bool) -> &'static str {
    if on {
        "0"
    } else {
        "1"
    }
}

#[async_trait]
impl PinController for SysfsGpio {
    async fn setup(&self, pin: u32) -> Result<()> {
        let exported = tokio::fs::try_exists(self.pin_dir(pin))
            .await
            .unwrap_or(false);
        if !exported {
            self.write(pin, self.root.join("export"), &pin.to_string())
                .await?;
        }
        self.write(pin, self.pin_dir(pin).join("direction"), "out")
            .await?;
        self.exported.lock().insert(pin);
        debug!(pin, "GPIO exported as output");
        self.set_pin(pin, false).await
    }

    async fn set_pin(&self, pin: u32, on: bool) -> Result<()> {
        self.ensure_exported(pin)?;
        self.write(pin, self.pin_dir(pin).join("value"), level(on))
            .await
    }

    async fn get_pin(&self, pin: u32) -> Result<bool> {
        self.ensure_exported(pin)?;
        let raw = tokio::fs::read_to_string(self.pin_dir(pin).join("value"))
            .await
            .map_err(|source| HardwareError::Gpio { pin, source })?;
        Ok(raw.trim() == "0")
    }

    async fn cleanup(&self) -> Result<()> {
        let pins: Vec<u32> = std::mem::take(&mut *self.exported.lock())
            .into_iter()
            .collect();
        for pin in pins {
            if let Err(e) = self.write(pin, self.root.join("unexport"), &pin.to_string()).await {
                warn!(pin, error = %e, "failed to unexport GPIO");
            }
        }
        Ok(())
    }
}
