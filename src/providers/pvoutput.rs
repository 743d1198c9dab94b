//! Publishes the boiler temperature to PVOutput as an extended status value.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{ProviderError, TemperatureSource};
use crate::actor::{self, Actor, ActorHandle, Context};
use crate::config::PvOutputConfig;

const ADD_STATUS_PATH: &str = "/service/r2/addstatus.jsp";

pub enum PvOutputMessage {
    Run { interval: Duration },
    Cancel,
}

#[derive(Debug, Clone)]
pub struct PvOutputClient {
    client: reqwest::Client,
    url: String,
    key: String,
    sid: String,
    field: String,
}

impl PvOutputClient {
    pub fn new(cfg: &PvOutputConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}{}", cfg.base_url.trim_end_matches('/'), ADD_STATUS_PATH),
            key: cfg.key.clone(),
            sid: cfg.sid.clone(),
            field: cfg.field.clone(),
        })
    }

    /// Query string of one status upload, `d` and `t` in local time.
    pub fn status_query(&self, at: NaiveDateTime, celsius: f64) -> Vec<(String, String)> {
        vec![
            ("key".to_string(), self.key.clone()),
            ("sid".to_string(), self.sid.clone()),
            ("d".to_string(), at.format("%Y%m%d").to_string()),
            ("t".to_string(), at.format("%H:%M").to_string()),
            (self.field.clone(), celsius.to_string()),
        ]
    }

    pub async fn add_status(
        &self,
        at: NaiveDateTime,
        celsius: f64,
    ) -> Result<String, ProviderError> {
        let query = self.status_query(at, celsius);
        debug!(url = %self.url, ?query, "sending status");
        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(response)
    }
}

pub struct PvOutputUploader {
    client: PvOutputClient,
    temperature: Arc<dyn TemperatureSource>,
}

impl PvOutputUploader {
    pub fn new(cfg: &PvOutputConfig, temperature: Arc<dyn TemperatureSource>) -> Result<Self> {
        Ok(Self {
            client: PvOutputClient::new(cfg)?,
            temperature,
        })
    }

    pub fn spawn(self) -> (PvOutputHandle, JoinHandle<()>) {
        let (handle, task) = actor::spawn(self);
        (PvOutputHandle(handle), task)
    }

    async fn upload(&self) -> Result<()> {
        let celsius = self.temperature.temperature().await?;
        let response = self
            .client
            .add_status(Local::now().naive_local(), celsius)
            .await?;
        debug!(response = %response.trim(), "status uploaded");
        Ok(())
    }
}

#[async_trait]
impl Actor for PvOutputUploader {
    type Message = PvOutputMessage;
    const NAME: &'static str = "pvoutput";

    async fn handle(
        &mut self,
        msg: PvOutputMessage,
        ctx: &mut Context<PvOutputMessage>,
    ) -> Result<()> {
        match msg {
            PvOutputMessage::Run { interval } => {
                if let Err(e) = self.upload().await {
                    error!(error = %e, "unable to upload status");
                }
                ctx.schedule_after(interval, PvOutputMessage::Run { interval });
            }
            PvOutputMessage::Cancel => {
                ctx.cancel();
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PvOutputHandle(ActorHandle<PvOutputMessage>);

impl PvOutputHandle {
    pub fn actor(&self) -> &ActorHandle<PvOutputMessage> {
        &self.0
    }

    pub fn run(&self, interval: Duration) {
        if let Err(e) = self.0.send(PvOutputMessage::Run { interval }) {
            warn!(error = %e, "cannot start status upload");
        }
    }

    pub fn cancel(&self) {
        if let Err(e) = self.0.send(PvOutputMessage::Cancel) {
            debug!(error = %e, "status upload already gone");
        }
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}
