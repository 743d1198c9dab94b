//! Periodic boiler temperature sampling.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::TemperatureSource;
use crate::actor::{self, Actor, ActorHandle, Context};
use crate::hardware::TemperatureSensor;

/// Reported when the probe cannot be read, so the water counts as hot.
pub const FAILED_READING_C: f64 = 100.0;

pub enum TemperatureMessage {
    Run { interval: Duration },
    Poll { interval: Duration },
    Cancel,
    /// Read the probe now and reply with the fresh value.
    Refresh(oneshot::Sender<f64>),
    Get(oneshot::Sender<f64>),
}

pub struct TemperatureMonitor {
    sensor: Arc<dyn TemperatureSensor>,
    celsius: f64,
}

impl TemperatureMonitor {
    pub fn new(sensor: Arc<dyn TemperatureSensor>) -> Self {
        Self {
            sensor,
            celsius: FAILED_READING_C,
        }
    }

    pub fn spawn(self) -> (TemperatureHandle, JoinHandle<()>) {
        let (handle, task) = actor::spawn(self);
        (TemperatureHandle(handle), task)
    }

    async fn sample(&mut self) -> f64 {
        self.celsius = match self.sensor.read_celsius().await {
            Ok(celsius) => {
                info!(celsius, "temperature");
                celsius
            }
            Err(e) => {
                warn!(error = %e, "temperature read failed");
                FAILED_READING_C
            }
        };
        self.celsius
    }
}

#[async_trait]
impl Actor for TemperatureMonitor {
    type Message = TemperatureMessage;
    const NAME: &'static str = "temperature";

    async fn handle(
        &mut self,
        msg: TemperatureMessage,
        ctx: &mut Context<TemperatureMessage>,
    ) -> Result<()> {
        match msg {
            TemperatureMessage::Run { interval } | TemperatureMessage::Poll { interval } => {
                self.sample().await;
                ctx.schedule_after(interval, TemperatureMessage::Poll { interval });
            }
            TemperatureMessage::Cancel => {
                ctx.cancel();
            }
            TemperatureMessage::Refresh(reply) => {
                let celsius = self.sample().await;
                let _ = reply.send(celsius);
            }
            TemperatureMessage::Get(reply) => {
                let _ = reply.send(self.celsius);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TemperatureHandle(ActorHandle<TemperatureMessage>);

impl TemperatureHandle {
    pub fn actor(&self) -> &ActorHandle<TemperatureMessage> {
        &self.0
    }

    /// Sample immediately, bypassing the polling interval.
    pub async fn refresh(&self) -> Result<f64> {
        Ok(self.0.ask(TemperatureMessage::Refresh).await?)
    }

    pub fn run(&self, interval: Duration) {
        if let Err(e) = self.0.send(TemperatureMessage::Run { interval }) {
            warn!(error = %e, "cannot start temperature polling");
        }
    }

    pub fn cancel(&self) {
        if let Err(e) = self.0.send(TemperatureMessage::Cancel) {
            debug!(error = %e, "temperature polling already gone");
        }
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}

#[async_trait]
impl TemperatureSource for TemperatureHandle {
    async fn temperature(&self) -> Result<f64> {
        Ok(self.0.ask(TemperatureMessage::Get).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FixedTemperatureSensor;

    #[tokio::test]
    async fn test_refresh_reads_sensor() {
        let (monitor, _task) =
            TemperatureMonitor::new(Arc::new(FixedTemperatureSensor::new(48.25))).spawn();
        assert_eq!(monitor.temperature().await.unwrap(), FAILED_READING_C);
        assert_eq!(monitor.refresh().await.unwrap(), 48.25);
        assert_eq!(monitor.temperature().await.unwrap(), 48.25);
    }

    #[tokio::test]
    async fn test_failed_read_reports_hot() {
        let (monitor, _task) =
            TemperatureMonitor::new(Arc::new(FixedTemperatureSensor::failing())).spawn();
        assert_eq!(monitor.refresh().await.unwrap(), FAILED_READING_C);
        assert!(!monitor.actor().is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_samples_periodically() {
        let (monitor, _task) =
            TemperatureMonitor::new(Arc::new(FixedTemperatureSensor::new(21.5))).spawn();
        monitor.run(Duration::from_secs(60));
        assert_eq!(monitor.temperature().await.unwrap(), 21.5);

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(monitor.temperature().await.unwrap(), 21.5);
        monitor.cancel();
        monitor.stop();
    }
}
