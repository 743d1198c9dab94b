use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use validator::Validate;

use crate::domain::{Hysteresis, ScheduleWindow};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub fronius: FroniusConfig,
    #[validate(nested)]
    pub openweathermap: OpenWeatherMapConfig,
    #[validate(nested)]
    pub pvoutput: PvOutputConfig,
    #[validate(nested)]
    pub temperature: TemperatureConfig,
    /// `[loads.<key>]` sections, ordered by key.
    #[serde(default)]
    pub loads: BTreeMap<String, LoadConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ControllerConfig {
    #[validate(range(min = 0.0))]
    pub hysteresis_to_grid: f64,
    #[validate(range(min = 0.0))]
    pub hysteresis_from_grid: f64,
    #[validate(range(max = 23))]
    pub schedule_start: u32,
    #[validate(range(max = 23))]
    pub schedule_stop: u32,
    #[serde(default = "default_delay")]
    #[validate(range(min = 1))]
    pub default_delay_secs: u64,
    #[serde(default = "default_idle_poll")]
    #[validate(range(min = 1))]
    pub idle_poll_secs: u64,
    #[serde(default = "default_solar_poll")]
    #[validate(range(min = 1))]
    pub solar_poll_secs: u64,
    #[serde(default = "default_weather_poll")]
    #[validate(range(min = 1))]
    pub weather_poll_secs: u64,
}

impl ControllerConfig {
    pub fn hysteresis(&self) -> Hysteresis {
        Hysteresis {
            to_grid_w: self.hysteresis_to_grid,
            from_grid_w: self.hysteresis_from_grid,
        }
    }

    pub fn schedule_window(&self) -> ScheduleWindow {
        ScheduleWindow {
            start_hour: self.schedule_start,
            stop_hour: self.schedule_stop,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FroniusConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[serde(default = "default_fronius_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    #[serde(default = "default_average_window")]
    #[validate(range(min = 1))]
    pub average_window: usize,
}

impl FroniusConfig {
    pub fn url(&self) -> String {
        format!(
            "http://{}/solar_api/v1/GetMeterRealtimeData.cgi?Scope=System",
            self.host
        )
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OpenWeatherMapConfig {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[validate(length(min = 1))]
    pub key: String,
    #[serde(default = "default_owm_url")]
    pub base_url: String,
    #[serde(default = "default_owm_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PvOutputConfig {
    #[validate(length(min = 1))]
    pub key: String,
    #[validate(length(min = 1))]
    pub sid: String,
    /// Extended data field receiving the temperature, e.g. `v7`.
    #[validate(length(min = 1))]
    pub field: String,
    #[serde(default = "default_pvoutput_url")]
    pub base_url: String,
    #[serde(default = "default_pvoutput_interval")]
    #[validate(range(min = 1))]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TemperatureConfig {
    /// 1-wire device id, e.g. `28-0000075a1c2b`.
    #[validate(length(min = 1))]
    pub address: String,
    #[serde(default = "default_temperature_interval")]
    #[validate(range(min = 1))]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct LoadConfig {
    pub pin: u32,
    #[validate(range(min = 1))]
    pub power: u32,
}

fn default_request_timeout() -> u64 {
    10
}
fn default_delay() -> u64 {
    60
}
fn default_idle_poll() -> u64 {
    60
}
fn default_solar_poll() -> u64 {
    30
}
fn default_weather_poll() -> u64 {
    3600
}
fn default_fronius_timeout() -> u64 {
    5
}
fn default_average_window() -> usize {
    2
}
fn default_owm_url() -> String {
    "https://api.openweathermap.org".to_string()
}
fn default_owm_timeout() -> u64 {
    10
}
fn default_pvoutput_url() -> String {
    "https://pvoutput.org".to_string()
}
fn default_pvoutput_interval() -> u64 {
    300
}
fn default_temperature_interval() -> u64 {
    60
}

impl Config {
    /// Load `path` merged with `WATTPILOT__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("WATTPILOT__").split("__"));
        let cfg: Config = figment
            .extract()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let cfg: Config = Figment::new().merge(Toml::string(toml)).extract()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Field ranges plus the cross-field rules the derive cannot express.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let c = &self.controller;
        if c.schedule_start >= c.schedule_stop {
            bail!(
                "schedule_start ({}) must be before schedule_stop ({})",
                c.schedule_start,
                c.schedule_stop
            );
        }

        let mut pins = HashSet::new();
        for (name, load) in &self.loads {
            load.validate()
                .with_context(|| format!("invalid load section {name}"))?;
            if !pins.insert(load.pin) {
                bail!("pin {} is used by more than one load ({name})", load.pin);
            }
        }
        Ok(())
    }
}
