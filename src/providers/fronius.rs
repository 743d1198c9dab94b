//! Fronius smart meter (Solar API v1).
//!
//! The meter exposes cumulative energy counters; power is derived from two
//! consecutive readings and smoothed over a short window.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{PowerCallback, PowerSource, ProviderError};
use crate::actor::{self, Actor, ActorHandle, Context};
use crate::config::FroniusConfig;

/// One sample of the meter's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EnergyReading {
    /// Unix seconds.
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
    /// Wh drawn from the grid since installation.
    #[serde(rename = "EnergyReal_WAC_Sum_Consumed")]
    pub consumed_wh: f64,
    /// Wh fed into the grid since installation.
    #[serde(rename = "EnergyReal_WAC_Sum_Produced")]
    pub produced_wh: f64,
}

#[derive(Debug, Deserialize)]
struct MeterResponse {
    #[serde(rename = "Body")]
    body: MeterBody,
}

#[derive(Debug, Deserialize)]
struct MeterBody {
    #[serde(rename = "Data")]
    data: HashMap<String, EnergyReading>,
}

impl EnergyReading {
    pub fn from_json(raw: &str) -> Result<Self, ProviderError> {
        let mut doc: MeterResponse =
            serde_json::from_str(raw).map_err(|e| ProviderError::Parse(e.to_string()))?;
        doc.body
            .data
            .remove("0")
            .ok_or_else(|| ProviderError::Parse("no meter with id 0".to_string()))
    }
}

/// Average grid power between two readings, in watts (negative = export).
///
/// Returns `None` when the meter clock went backwards.
pub fn compute_power(previous: &EnergyReading, current: &EnergyReading) -> Option<f64> {
    if current.timestamp < previous.timestamp {
        return None;
    }
    let duration = current.timestamp - previous.timestamp;
    if duration == 0 {
        return Some(0.0);
    }
    let consumed = current.consumed_wh - previous.consumed_wh;
    let produced = current.produced_wh - previous.produced_wh;
    Some((consumed - produced) * 3600.0 / duration as f64)
}

/// Moving average over the last `window` values.
#[derive(Debug, Clone)]
pub struct AverageReadings {
    values: VecDeque<f64>,
    window: usize,
}

impl AverageReadings {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            values: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// 0 while empty.
    pub fn average(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct FroniusClient {
    client: reqwest::Client,
    url: String,
}

impl FroniusClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub async fn fetch(&self) -> Result<EnergyReading, ProviderError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        EnergyReading::from_json(&body)
    }
}

pub enum PowerMessage {
    /// Reset history, poll now and keep polling every `interval`.
    Run { interval: Duration },
    /// One polling pass, then re-arm.
    Poll { interval: Duration },
    Cancel,
    RegisterCallback(Option<PowerCallback>, oneshot::Sender<()>),
    GetPower(oneshot::Sender<f64>),
}

pub struct FroniusMeter {
    client: FroniusClient,
    callback: Option<PowerCallback>,
    last_reading: Option<EnergyReading>,
    power: AverageReadings,
}

impl FroniusMeter {
    pub fn new(cfg: &FroniusConfig) -> Result<Self> {
        Self::with_url(
            cfg.url(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.average_window,
        )
    }

    pub fn with_url(url: String, timeout: Duration, average_window: usize) -> Result<Self> {
        Ok(Self {
            client: FroniusClient::new(url, timeout)?,
            callback: None,
            last_reading: None,
            power: AverageReadings::new(average_window),
        })
    }

    pub fn spawn(self) -> (PowerHandle, JoinHandle<()>) {
        let (handle, task) = actor::spawn(self);
        (PowerHandle(handle), task)
    }

    async fn poll(&mut self) {
        let reading = match self.client.fetch().await {
            Ok(reading) => reading,
            Err(e) => {
                error!(error = %e, "unable to read power meter");
                return;
            }
        };
        debug!(
            consumed_wh = reading.consumed_wh,
            produced_wh = reading.produced_wh,
            "meter reading"
        );

        if let Some(previous) = self.last_reading {
            match compute_power(&previous, &reading) {
                Some(power) => {
                    info!(power_w = power, "power");
                    self.power.push(power);
                    if let Some(callback) = &self.callback {
                        callback();
                    }
                }
                None => warn!(
                    previous = previous.timestamp,
                    current = reading.timestamp,
                    "meter timestamp went backwards, skipping"
                ),
            }
        }
        self.last_reading = Some(reading);
    }
}

#[async_trait]
impl Actor for FroniusMeter {
    type Message = PowerMessage;
    const NAME: &'static str = "fronius";

    async fn handle(&mut self, msg: PowerMessage, ctx: &mut Context<PowerMessage>) -> Result<()> {
        match msg {
            PowerMessage::Run { interval } => {
                self.last_reading = None;
                self.power.clear();
                self.poll().await;
                ctx.schedule_after(interval, PowerMessage::Poll { interval });
            }
            PowerMessage::Poll { interval } => {
                self.poll().await;
                ctx.schedule_after(interval, PowerMessage::Poll { interval });
            }
            PowerMessage::Cancel => {
                ctx.cancel();
            }
            PowerMessage::RegisterCallback(callback, reply) => {
                info!(registered = callback.is_some(), "power callback changed");
                self.callback = callback;
                let _ = reply.send(());
            }
            PowerMessage::GetPower(reply) => {
                let _ = reply.send(self.power.average());
            }
        }
        Ok(())
    }
}

/// [`PowerSource`] backed by the [`FroniusMeter`] actor.
#[derive(Clone, Debug)]
pub struct PowerHandle(ActorHandle<PowerMessage>);

impl PowerHandle {
    pub fn actor(&self) -> &ActorHandle<PowerMessage> {
        &self.0
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}

#[async_trait]
impl PowerSource for PowerHandle {
    async fn power(&self) -> Result<f64> {
        Ok(self.0.ask(PowerMessage::GetPower).await?)
    }

    async fn register_callback(&self, callback: Option<PowerCallback>) -> Result<()> {
        Ok(self
            .0
            .ask(|reply| PowerMessage::RegisterCallback(callback, reply))
            .await?)
    }

    fn run(&self, interval: Duration) {
        if let Err(e) = self.0.send(PowerMessage::Run { interval }) {
            warn!(error = %e, "cannot start power polling");
        }
    }

    fn cancel(&self) {
        if let Err(e) = self.0.send(PowerMessage::Cancel) {
            debug!(error = %e, "power polling already gone");
        }
    }
}
