//! Daily cloud cover forecast from the OpenWeatherMap One Call API.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Forecast, ProviderError, WeatherSource};
use crate::actor::{self, Actor, ActorHandle, Context};
use crate::config::OpenWeatherMapConfig;

#[derive(Debug, Deserialize)]
pub struct OneCallResponse {
    #[serde(default)]
    pub daily: Vec<DailyForecast>,
}

#[derive(Debug, Deserialize)]
pub struct DailyForecast {
    pub dt: i64,
    pub clouds: u8,
}

/// The first daily entry after `now`, or the "not sunny" default when the
/// document holds none.
pub fn select_forecast(doc: &OneCallResponse, now: i64) -> Forecast {
    doc.daily
        .iter()
        .find(|d| d.dt > now)
        .map(|d| Forecast {
            timestamp: d.dt,
            cloudiness: d.clouds.min(100),
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct OpenWeatherMapClient {
    client: reqwest::Client,
    url: String,
}

impl OpenWeatherMapClient {
    pub fn new(cfg: &OpenWeatherMapConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let url = format!(
            "{}/data/2.5/onecall?lat={}&lon={}&appid={}",
            cfg.base_url.trim_end_matches('/'),
            cfg.lat,
            cfg.lon,
            cfg.key
        );
        Ok(Self { client, url })
    }

    pub async fn fetch(&self) -> Result<OneCallResponse, ProviderError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

pub enum WeatherMessage {
    Run { interval: Duration },
    Poll { interval: Duration },
    Cancel,
    GetForecast(oneshot::Sender<Forecast>),
}

pub struct OpenWeatherMap {
    client: OpenWeatherMapClient,
    forecast: Forecast,
}

impl OpenWeatherMap {
    pub fn new(cfg: &OpenWeatherMapConfig) -> Result<Self> {
        Ok(Self {
            client: OpenWeatherMapClient::new(cfg)?,
            forecast: Forecast::default(),
        })
    }

    pub fn spawn(self) -> (WeatherHandle, JoinHandle<()>) {
        let (handle, task) = actor::spawn(self);
        (WeatherHandle(handle), task)
    }

    async fn poll(&mut self) {
        match self.client.fetch().await {
            Ok(doc) => {
                self.forecast = select_forecast(&doc, Utc::now().timestamp());
                let day = DateTime::<Utc>::from_timestamp(self.forecast.timestamp, 0);
                info!(
                    day = ?day,
                    cloudiness = self.forecast.cloudiness,
                    "forecast updated"
                );
            }
            Err(e) => error!(error = %e, "unable to download forecast"),
        }
    }
}

#[async_trait]
impl Actor for OpenWeatherMap {
    type Message = WeatherMessage;
    const NAME: &'static str = "openweathermap";

    async fn handle(
        &mut self,
        msg: WeatherMessage,
        ctx: &mut Context<WeatherMessage>,
    ) -> Result<()> {
        match msg {
            WeatherMessage::Run { interval } | WeatherMessage::Poll { interval } => {
                self.poll().await;
                ctx.schedule_after(interval, WeatherMessage::Poll { interval });
            }
            WeatherMessage::Cancel => {
                ctx.cancel();
            }
            WeatherMessage::GetForecast(reply) => {
                let _ = reply.send(self.forecast);
            }
        }
        Ok(())
    }
}

/// [`WeatherSource`] backed by the [`OpenWeatherMap`] actor.
#[derive(Clone, Debug)]
pub struct WeatherHandle(ActorHandle<WeatherMessage>);

impl WeatherHandle {
    pub fn actor(&self) -> &ActorHandle<WeatherMessage> {
        &self.0
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}

#[async_trait]
impl WeatherSource for WeatherHandle {
    async fn forecast(&self) -> Result<Forecast> {
        Ok(self.0.ask(WeatherMessage::GetForecast).await?)
    }

    fn run(&self, interval: Duration) {
        if let Err(e) = self.0.send(WeatherMessage::Run { interval }) {
            warn!(error = %e, "cannot start forecast polling");
        }
    }

    fn cancel(&self) {
        if let Err(e) = self.0.send(WeatherMessage::Cancel) {
            debug!(error = %e, "forecast polling already gone");
        }
    }
}
