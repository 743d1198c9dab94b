use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use super::{HardwareError, TemperatureSensor};

/// DS18B20 probe exposed by the `w1_therm` kernel driver.
#[derive(Debug, Clone)]
pub struct W1TemperatureSensor {
    address: String,
    path: PathBuf,
}

impl W1TemperatureSensor {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_root("/sys/bus/w1/devices", address)
    }

    pub fn with_root(root: impl Into<PathBuf>, address: impl Into<String>) -> Self {
        let address = address.into();
        let path = root.into().join(&address).join("w1_slave");
        Self { address, path }
    }

    fn error(&self, reason: impl Into<String>) -> HardwareError {
        HardwareError::Sensor {
            address: self.address.clone(),
            reason: reason.into(),
        }
    }
}

/// Parse the two-line `w1_slave` dump:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(raw: &str) -> Option<f64> {
    let mut lines = raw.lines();
    if !lines.next()?.trim_end().ends_with("YES") {
        return None;
    }
    let (_, millis) = lines.next()?.rsplit_once("t=")?;
    let millis: i32 = millis.trim().parse().ok()?;
    Some(f64::from(millis) / 1000.0)
}

#[async_trait]
impl TemperatureSensor for W1TemperatureSensor {
    async fn read_celsius(&self) -> Result<f64> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.error(e.to_string()))?;
        Ok(parse_w1_slave(&raw).ok_or_else(|| self.error("bad CRC or malformed reading"))?)
    }
}
