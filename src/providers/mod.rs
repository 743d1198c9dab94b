//! External data sources, each running as its own actor.
//!
//! The controller only sees the traits below. Network and parse failures
//! stay inside the providers: they log, keep the last good value and
//! re-arm their polling timer.

pub mod fronius;
pub mod mock;
pub mod openweathermap;
pub mod pvoutput;
pub mod temperature;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use fronius::{FroniusMeter, PowerHandle};
pub use mock::{MockPowerSource, MockTemperatureSource, MockWeatherSource};
pub use openweathermap::{OpenWeatherMap, WeatherHandle};
pub use pvoutput::{PvOutputHandle, PvOutputUploader};
pub use temperature::{TemperatureHandle, TemperatureMonitor};

/// Above this forecast cloudiness (%) tomorrow is not considered sunny.
pub const CLOUDY_ABOVE_PERCENT: u8 = 75;

/// Invoked by a power source after every new reading.
pub type PowerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Parse(String),
}

/// Net grid power, negative while exporting.
#[async_trait]
pub trait PowerSource: Send + Sync {
    /// Last known averaged power in watts.
    async fn power(&self) -> Result<f64>;
    /// Replace the reading callback. `None` clears it.
    async fn register_callback(&self, callback: Option<PowerCallback>) -> Result<()>;
    /// Start polling now and then every `interval`.
    fn run(&self, interval: Duration);
    /// Stop polling. Does not wait for a reading in flight.
    fn cancel(&self);
}

/// Cloud cover forecast for the next day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forecast {
    /// Unix timestamp of the forecast day, 0 when unknown.
    pub timestamp: i64,
    /// Cloud cover in percent.
    pub cloudiness: u8,
}

impl Forecast {
    pub fn is_cloudy(&self) -> bool {
        self.cloudiness > CLOUDY_ABOVE_PERCENT
    }
}

impl Default for Forecast {
    /// Not sunny until a forecast was fetched.
    fn default() -> Self {
        Self {
            timestamp: 0,
            cloudiness: 100,
        }
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn forecast(&self) -> Result<Forecast>;

    async fn cloudiness(&self) -> Result<u8> {
        Ok(self.forecast().await?.cloudiness)
    }

    fn run(&self, interval: Duration);
    fn cancel(&self);
}

#[async_trait]
pub trait TemperatureSource: Send + Sync {
    /// Last known temperature in °C.
    async fn temperature(&self) -> Result<f64>;
}
