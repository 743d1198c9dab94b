pub mod clock;
pub mod machine;

use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::LoadRegistry;
use crate::hardware::{DeviceFactory, PinController};
use crate::providers::{
    FroniusMeter, OpenWeatherMap, PowerHandle, PvOutputHandle, PvOutputUploader, TemperatureHandle,
    TemperatureMonitor, TemperatureSource, WeatherHandle, WeatherSource,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use machine::{
    ControllerHandle, ControllerMessage, ControllerSettings, ControllerTimings, LoadController,
    LoadStatus, StateSnapshot,
};

/// Shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: ControllerHandle,
    pub weather: Arc<dyn WeatherSource>,
    pub temperature: Arc<dyn TemperatureSource>,
}

impl AppState {
    pub fn new(
        controller: ControllerHandle,
        weather: Arc<dyn WeatherSource>,
        temperature: Arc<dyn TemperatureSource>,
    ) -> Self {
        Self {
            controller,
            weather,
            temperature,
        }
    }
}

/// Every running actor plus the relay board, owned by `main`.
pub struct Services {
    pub state: AppState,
    pins: Arc<dyn PinController>,
    power: PowerHandle,
    weather: WeatherHandle,
    temperature: TemperatureHandle,
    pvoutput: PvOutputHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Spawn the providers and the controller. The controller is left in
    /// Halt with every relay set up and off.
    pub async fn start(cfg: Config, factory: &DeviceFactory) -> Result<Self> {
        let pins = factory.create_pins();
        let sensor = factory.create_temperature_sensor(&cfg);

        let (temperature, temperature_task) = TemperatureMonitor::new(sensor).spawn();
        let celsius = temperature
            .refresh()
            .await
            .context("temperature monitor did not start")?;
        info!(celsius, "first temperature reading");
        temperature.run(Duration::from_secs(cfg.temperature.interval_secs));

        let (power, power_task) = FroniusMeter::new(&cfg.fronius)?.spawn();
        let (weather, weather_task) = OpenWeatherMap::new(&cfg.openweathermap)?.spawn();

        let (pvoutput, pvoutput_task) =
            PvOutputUploader::new(&cfg.pvoutput, Arc::new(temperature.clone()))?.spawn();
        pvoutput.run(Duration::from_secs(cfg.pvoutput.interval_secs));

        let registry = Arc::new(LoadRegistry::from_config(&cfg.loads));
        info!(loads = registry.len(), "load registry built");
        let controller = LoadController::new(
            registry,
            ControllerSettings::from_config(&cfg.controller),
            pins.clone(),
            Arc::new(power.clone()),
            Arc::new(weather.clone()),
            Arc::new(SystemClock),
        );
        controller.setup_pins().await.context("relay setup failed")?;
        let (controller, controller_task) = controller.spawn();

        let state = AppState::new(
            controller,
            Arc::new(weather.clone()),
            Arc::new(temperature.clone()),
        );
        Ok(Self {
            state,
            pins,
            power,
            weather,
            temperature,
            pvoutput,
            tasks: vec![
                controller_task,
                temperature_task,
                power_task,
                weather_task,
                pvoutput_task,
            ],
        })
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.state.controller
    }

    /// Halt the controller so every relay is off, then stop all actors and
    /// release the pins.
    pub async fn shutdown(self) -> Result<()> {
        match self.state.controller.halt().await {
            Ok(_) => info!("controller halted"),
            Err(e) => warn!(error = %e, "controller was not running at shutdown"),
        }

        self.state.controller.stop();
        self.pvoutput.stop();
        self.temperature.stop();
        self.weather.stop();
        self.power.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "actor task panicked");
            }
        }

        self.pins.cleanup().await
    }
}
