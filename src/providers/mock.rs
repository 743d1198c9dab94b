//! In-memory sources for tests and local experiments.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use super::{Forecast, PowerCallback, PowerSource, TemperatureSource, WeatherSource};

/// Power source driven by hand: set a value, then [`MockPowerSource::fire`]
/// to deliver a reading notification.
#[derive(Default)]
pub struct MockPowerSource {
    power: Mutex<f64>,
    callback: Mutex<Option<PowerCallback>>,
    registrations: Mutex<Vec<bool>>,
    runs: Mutex<Vec<Duration>>,
    cancels: Mutex<usize>,
}

impl MockPowerSource {
    pub fn new(power: f64) -> Self {
        Self {
            power: Mutex::new(power),
            ..Self::default()
        }
    }

    pub fn set_power(&self, power: f64) {
        *self.power.lock() = power;
    }

    /// Invoke the registered callback, if any. Returns whether one was.
    pub fn fire(&self) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Set the power and notify.
    pub fn reading(&self, power: f64) -> bool {
        self.set_power(power);
        self.fire()
    }

    /// The registered callback itself, to replay a reading that was already
    /// in flight when the registration changed.
    pub fn callback(&self) -> Option<PowerCallback> {
        self.callback.lock().clone()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// One entry per `register_callback`, `true` for a set, `false` for a clear.
    pub fn registrations(&self) -> Vec<bool> {
        self.registrations.lock().clone()
    }

    pub fn runs(&self) -> Vec<Duration> {
        self.runs.lock().clone()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock()
    }
}

#[async_trait]
impl PowerSource for MockPowerSource {
    async fn power(&self) -> Result<f64> {
        Ok(*self.power.lock())
    }

    async fn register_callback(&self, callback: Option<PowerCallback>) -> Result<()> {
        self.registrations.lock().push(callback.is_some());
        *self.callback.lock() = callback;
        Ok(())
    }

    fn run(&self, interval: Duration) {
        self.runs.lock().push(interval);
    }

    fn cancel(&self) {
        *self.cancels.lock() += 1;
    }
}

pub struct MockWeatherSource {
    forecast: Mutex<Forecast>,
    runs: Mutex<Vec<Duration>>,
    cancels: Mutex<usize>,
}

impl MockWeatherSource {
    pub fn new(cloudiness: u8) -> Self {
        Self {
            forecast: Mutex::new(Forecast {
                timestamp: 0,
                cloudiness,
            }),
            runs: Mutex::new(Vec::new()),
            cancels: Mutex::new(0),
        }
    }

    pub fn set_cloudiness(&self, cloudiness: u8) {
        self.forecast.lock().cloudiness = cloudiness;
    }

    pub fn set_forecast(&self, forecast: Forecast) {
        *self.forecast.lock() = forecast;
    }

    pub fn runs(&self) -> Vec<Duration> {
        self.runs.lock().clone()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock()
    }
}

impl Default for MockWeatherSource {
    fn default() -> Self {
        Self::new(Forecast::default().cloudiness)
    }
}

#[async_trait]
impl WeatherSource for MockWeatherSource {
    async fn forecast(&self) -> Result<Forecast> {
        Ok(*self.forecast.lock())
    }

    fn run(&self, interval: Duration) {
        self.runs.lock().push(interval);
    }

    fn cancel(&self) {
        *self.cancels.lock() += 1;
    }
}

pub struct MockTemperatureSource {
    celsius: Mutex<f64>,
}

impl MockTemperatureSource {
    pub fn new(celsius: f64) -> Self {
        Self {
            celsius: Mutex::new(celsius),
        }
    }

    pub fn set(&self, celsius: f64) {
        *self.celsius.lock() = celsius;
    }
}

#[async_trait]
impl TemperatureSource for MockTemperatureSource {
    async fn temperature(&self) -> Result<f64> {
        Ok(*self.celsius.lock())
    }
}
