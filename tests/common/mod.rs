#![allow(dead_code)]
//! Controller wired to in-memory devices and sources.

use std::sync::Arc;
use std::time::Duration;

use wattpilot::controller::{
    ControllerHandle, ControllerSettings, ControllerTimings, LoadController, ManualClock,
};
use wattpilot::domain::{Hysteresis, Load, LoadRegistry, ScheduleWindow};
use wattpilot::hardware::SimulatedPins;
use wattpilot::providers::{MockPowerSource, MockWeatherSource};

pub const PIN_1KW: u32 = 1;
pub const PIN_2KW: u32 = 2;

pub struct Rig {
    pub controller: ControllerHandle,
    pub pins: Arc<SimulatedPins>,
    pub power: Arc<MockPowerSource>,
    pub weather: Arc<MockWeatherSource>,
    pub clock: Arc<ManualClock>,
}

/// Two loads (1 kW on pin 1, 2 kW on pin 2), 200 W export margin, no import
/// tolerance, schedule window [2, 6).
pub fn settings() -> ControllerSettings {
    ControllerSettings {
        hysteresis: Hysteresis {
            to_grid_w: 200.0,
            from_grid_w: 0.0,
        },
        window: ScheduleWindow {
            start_hour: 2,
            stop_hour: 6,
        },
        timings: ControllerTimings::default(),
    }
}

pub async fn rig(hour: u32, power_w: f64, cloudiness: u8) -> Rig {
    let registry = Arc::new(LoadRegistry::new(vec![
        Load::new(PIN_1KW, 1000),
        Load::new(PIN_2KW, 2000),
    ]));
    let pins = Arc::new(SimulatedPins::new());
    let power = Arc::new(MockPowerSource::new(power_w));
    let weather = Arc::new(MockWeatherSource::new(cloudiness));
    let clock = Arc::new(ManualClock::at_hour(hour));

    let controller = LoadController::new(
        registry,
        settings(),
        pins.clone(),
        power.clone(),
        weather.clone(),
        clock.clone(),
    );
    controller.setup_pins().await.expect("pins set up");
    let (controller, _task) = controller.spawn();

    Rig {
        controller,
        pins,
        power,
        weather,
        clock,
    }
}

impl Rig {
    /// Drain messages the controller queued for itself.
    pub async fn settle(&self) {
        for _ in 0..5 {
            self.controller.snapshot().await.expect("controller alive");
        }
    }

    /// Deliver one power reading and wait for it to be handled.
    pub async fn reading(&self, power_w: f64) {
        self.power.reading(power_w);
        self.settle().await;
    }

    /// Let the controller's timers run for `secs` of (paused) time.
    pub async fn wait(&self, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        self.settle().await;
    }

    pub async fn active_pins(&self) -> Vec<u32> {
        self.controller
            .loads()
            .await
            .expect("controller alive")
            .into_iter()
            .filter(|l| l.active)
            .map(|l| l.pin)
            .collect()
    }

    /// Relay levels agree with the controller's bookkeeping.
    pub async fn assert_pins_mirror_loads(&self) {
        for load in self.controller.loads().await.expect("controller alive") {
            assert_eq!(
                self.pins.level(load.pin),
                Some(load.active),
                "pin {} out of sync",
                load.pin
            );
        }
    }
}
