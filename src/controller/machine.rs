//! The five-state load controller.
//!
//! ```text
//!            halt (from anywhere)
//!   Halt ──idle──▶ Idle ──surplus──▶ Solar
//!                   │ ▲ ◀──import, nothing on──┘
//!        window &&  │ │ window over
//!   (trigger|cloudy)▼ │
//!                 Schedule
//!   Idle/Schedule/Solar ──force──▶ Force ──idle──▶ Idle
//! ```
//!
//! All decisions run inside the actor, so the active load list and the
//! relay pins are only ever touched by one task.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use crate::actor::{self, Actor, ActorHandle, Context, SendError};
use crate::config::ControllerConfig;
use crate::domain::{
    Command, ControllerState, Hysteresis, Load, LoadRegistry, ScheduleWindow, Trigger,
};
use crate::hardware::PinController;
use crate::providers::{PowerCallback, PowerSource, WeatherSource};

/// Polling periods and re-evaluation delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimings {
    /// Delay between two Idle or Schedule re-evaluations.
    pub default_delay: Duration,
    pub idle_poll: Duration,
    pub solar_poll: Duration,
    pub weather_poll: Duration,
}

impl Default for ControllerTimings {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(60),
            idle_poll: Duration::from_secs(60),
            solar_poll: Duration::from_secs(30),
            weather_poll: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    pub hysteresis: Hysteresis,
    pub window: ScheduleWindow,
    pub timings: ControllerTimings,
}

impl ControllerSettings {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self {
            hysteresis: cfg.hysteresis(),
            window: cfg.schedule_window(),
            timings: ControllerTimings {
                default_delay: Duration::from_secs(cfg.default_delay_secs),
                idle_poll: Duration::from_secs(cfg.idle_poll_secs),
                solar_poll: Duration::from_secs(cfg.solar_poll_secs),
                weather_poll: Duration::from_secs(cfg.weather_poll_secs),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub state: ControllerState,
    /// Local time of the last state change.
    pub since: NaiveDateTime,
    pub time_in_state_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadStatus {
    pub pin: u32,
    pub power: u32,
    pub active: bool,
}

pub enum ControllerMessage {
    /// External request, answered with whether the trigger was accepted.
    Transition {
        trigger: Trigger,
        reply: oneshot::Sender<bool>,
    },
    /// A transition the machine queued for itself. Dropped when `epoch` is
    /// no longer current.
    Scheduled { trigger: Trigger, epoch: u64 },
    /// A power reading arrived for the given subscription.
    UpdatePower { subscription: u64 },
    GetState(oneshot::Sender<StateSnapshot>),
    GetScheduleTrigger(oneshot::Sender<bool>),
    SetScheduleTrigger(bool, oneshot::Sender<bool>),
    GetLoads(oneshot::Sender<Vec<LoadStatus>>),
}

/// Where an accepted trigger leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Exit the current state and enter another one.
    Enter(ControllerState),
    /// Stay put, only run the post-transition decision.
    Stay,
}

/// Transition table. `None` means the trigger is refused in `from`.
fn route(from: ControllerState, trigger: Trigger) -> Option<Route> {
    use ControllerState as S;

    match (trigger, from) {
        (Trigger::Halt, S::Halt) => Some(Route::Stay),
        (Trigger::Halt, _) => Some(Route::Enter(S::Halt)),
        (Trigger::Idle, S::Idle) => Some(Route::Stay),
        (Trigger::Idle, _) => Some(Route::Enter(S::Idle)),
        (Trigger::Force, S::Idle | S::Schedule | S::Solar) => Some(Route::Enter(S::Force)),
        (Trigger::Schedule, S::Idle) => Some(Route::Enter(S::Schedule)),
        (Trigger::Schedule, S::Schedule) => Some(Route::Stay),
        (Trigger::Solar, S::Idle) => Some(Route::Enter(S::Solar)),
        _ => None,
    }
}

pub struct LoadController {
    registry: Arc<LoadRegistry>,
    settings: ControllerSettings,
    pins: Arc<dyn PinController>,
    power: Arc<dyn PowerSource>,
    weather: Arc<dyn WeatherSource>,
    clock: Arc<dyn Clock>,
    state: ControllerState,
    since: NaiveDateTime,
    /// Switched-on loads, most recent last.
    active: Vec<Load>,
    schedule_trigger: bool,
    /// Id handed to the last registered power callback.
    subscription: u64,
    subscribed: bool,
    /// Bumped whenever queued self-transitions must be forgotten.
    epoch: u64,
}

impl LoadController {
    pub fn new(
        registry: Arc<LoadRegistry>,
        settings: ControllerSettings,
        pins: Arc<dyn PinController>,
        power: Arc<dyn PowerSource>,
        weather: Arc<dyn WeatherSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let since = clock.now();
        Self {
            registry,
            settings,
            pins,
            power,
            weather,
            clock,
            state: ControllerState::Halt,
            since,
            active: Vec::new(),
            schedule_trigger: false,
            subscription: 0,
            subscribed: false,
            epoch: 0,
        }
    }

    /// Configure every registered relay as an output, switched off.
    pub async fn setup_pins(&self) -> Result<()> {
        for load in self.registry.loads() {
            self.pins.setup(load.pin).await?;
            debug!(pin = load.pin, power_w = load.power_w, "pin ready");
        }
        Ok(())
    }

    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (handle, task) = actor::spawn(self);
        (ControllerHandle(handle), task)
    }

    async fn transition(
        &mut self,
        trigger: Trigger,
        ctx: &mut Context<ControllerMessage>,
    ) -> Result<bool> {
        let Some(step) = route(self.state, trigger) else {
            info!(state = %self.state, %trigger, "transition refused");
            return Ok(false);
        };

        self.cancel_pending(ctx);
        if let Route::Enter(next) = step {
            let previous = self.state;
            self.exit(previous).await?;
            self.state = next;
            self.since = self.clock.now();
            info!(from = %previous, to = %next, "state changed");
            self.enter(next, ctx).await?;
        }

        match trigger {
            Trigger::Idle => self.decide_idle(ctx).await?,
            Trigger::Schedule => self.check_schedule(ctx),
            _ => {}
        }
        Ok(true)
    }

    async fn exit(&mut self, state: ControllerState) -> Result<()> {
        match state {
            ControllerState::Halt => {
                self.weather.run(self.settings.timings.weather_poll);
            }
            ControllerState::Idle | ControllerState::Solar => {
                info!(state = %state, "exiting state");
                self.unsubscribe().await?;
            }
            ControllerState::Force | ControllerState::Schedule => {}
        }
        Ok(())
    }

    async fn enter(
        &mut self,
        state: ControllerState,
        ctx: &mut Context<ControllerMessage>,
    ) -> Result<()> {
        info!(state = %state, "entering state");
        match state {
            ControllerState::Halt => {
                self.stop_all_active().await?;
                self.power.cancel();
                self.weather.cancel();
            }
            ControllerState::Idle => {
                self.stop_all_active().await?;
                self.subscribe(ctx).await?;
                self.power.run(self.settings.timings.idle_poll);
            }
            ControllerState::Force => {
                self.start_all_inactive().await?;
            }
            ControllerState::Schedule => {
                self.schedule_trigger = false;
                self.start_all_inactive().await?;
            }
            ControllerState::Solar => {
                self.subscribe(ctx).await?;
                self.power.run(self.settings.timings.solar_poll);
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self, ctx: &Context<ControllerMessage>) -> Result<()> {
        self.subscription += 1;
        let subscription = self.subscription;
        let handle = ctx.handle();
        let callback: PowerCallback = Arc::new(move || {
            if let Err(e) = handle.send(ControllerMessage::UpdatePower { subscription }) {
                debug!(error = %e, "power reading dropped");
            }
        });
        self.power.register_callback(Some(callback)).await?;
        self.subscribed = true;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.power.cancel();
        self.subscribed = false;
        self.power.register_callback(None).await
    }

    async fn update_power(
        &mut self,
        subscription: u64,
        ctx: &mut Context<ControllerMessage>,
    ) -> Result<()> {
        if !self.subscribed || subscription != self.subscription {
            debug!(state = %self.state, subscription, "stale power reading ignored");
            return Ok(());
        }
        match self.state {
            ControllerState::Idle => {
                self.cancel_pending(ctx);
                self.decide_idle(ctx).await
            }
            ControllerState::Solar => {
                self.cancel_pending(ctx);
                self.decide_solar(ctx).await
            }
            state => {
                debug!(state = %state, "power reading ignored");
                Ok(())
            }
        }
    }

    /// Go solar when the surplus covers the smallest idle load plus the
    /// export margin, else run the schedule, else look again later.
    async fn decide_idle(&mut self, ctx: &mut Context<ControllerMessage>) -> Result<()> {
        let surplus = -self.power.power().await?;
        let minimum = self.registry.minimum_inactive_power(&self.active);
        let hysteresis = self.settings.hysteresis;

        if minimum + hysteresis.to_grid_w <= surplus {
            debug!(surplus_w = surplus, minimum_w = minimum, "enough surplus for solar");
            self.later(ctx, Duration::ZERO, Trigger::Solar);
            return Ok(());
        }

        if self.settings.window.contains(self.clock.hour()) {
            let cloudy = self.weather.forecast().await?.is_cloudy();
            if self.schedule_trigger || cloudy {
                debug!(trigger = self.schedule_trigger, cloudy, "schedule window open");
                self.later(ctx, Duration::ZERO, Trigger::Schedule);
                return Ok(());
            }
        }

        self.later(ctx, self.settings.timings.default_delay, Trigger::Idle);
        Ok(())
    }

    /// Shed the newest load while importing beyond the tolerance, otherwise
    /// add the largest load the surplus can carry.
    async fn decide_solar(&mut self, ctx: &mut Context<ControllerMessage>) -> Result<()> {
        let power = self.power.power().await?;
        let hysteresis = self.settings.hysteresis;

        if power > hysteresis.from_grid_w {
            match self.active.pop() {
                Some(load) => {
                    info!(
                        pin = load.pin,
                        power_w = power,
                        "turning a load off, consuming from grid"
                    );
                    self.pins.set_pin(load.pin, false).await?;
                }
                None => self.later(ctx, Duration::ZERO, Trigger::Idle),
            }
            return Ok(());
        }

        let available = -power - hysteresis.to_grid_w;
        if let Some(load) = self.registry.best_fit(available, &self.active) {
            info!(pin = load.pin, power_w = -power, "turning a load on, exporting to grid");
            self.active.push(load);
            self.pins.set_pin(load.pin, true).await?;
        }
        Ok(())
    }

    fn check_schedule(&mut self, ctx: &mut Context<ControllerMessage>) {
        if self.settings.window.is_over(self.clock.hour()) {
            self.later(ctx, Duration::ZERO, Trigger::Idle);
        } else {
            self.later(ctx, self.settings.timings.default_delay, Trigger::Schedule);
        }
    }

    fn later(&self, ctx: &mut Context<ControllerMessage>, delay: Duration, trigger: Trigger) {
        let epoch = self.epoch;
        ctx.schedule_after(delay, ControllerMessage::Scheduled { trigger, epoch });
    }

    /// Drop the pending timer and every self-transition already queued.
    fn cancel_pending(&mut self, ctx: &mut Context<ControllerMessage>) {
        ctx.cancel();
        self.epoch += 1;
    }

    async fn stop_all_active(&mut self) -> Result<()> {
        while let Some(load) = self.active.pop() {
            self.pins.set_pin(load.pin, false).await?;
            info!(pin = load.pin, "load off");
        }
        Ok(())
    }

    async fn start_all_inactive(&mut self) -> Result<()> {
        let inactive: Vec<Load> = self.registry.inactive(&self.active).copied().collect();
        for load in inactive {
            self.active.push(load);
            self.pins.set_pin(load.pin, true).await?;
            info!(pin = load.pin, "load on");
        }
        Ok(())
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            since: self.since,
            time_in_state_secs: (self.clock.now() - self.since).num_seconds(),
        }
    }

    fn load_status(&self) -> Vec<LoadStatus> {
        self.registry
            .loads()
            .iter()
            .map(|load| LoadStatus {
                pin: load.pin,
                power: load.power_w,
                active: self.active.contains(load),
            })
            .collect()
    }
}

#[async_trait]
impl Actor for LoadController {
    type Message = ControllerMessage;
    const NAME: &'static str = "controller";

    async fn handle(
        &mut self,
        msg: ControllerMessage,
        ctx: &mut Context<ControllerMessage>,
    ) -> Result<()> {
        match msg {
            ControllerMessage::Transition { trigger, reply } => {
                let accepted = self.transition(trigger, ctx).await?;
                let _ = reply.send(accepted);
            }
            ControllerMessage::Scheduled { trigger, epoch } => {
                if epoch != self.epoch {
                    debug!(state = %self.state, %trigger, "stale scheduled transition dropped");
                } else if !self.transition(trigger, ctx).await? {
                    warn!(state = %self.state, %trigger, "scheduled transition refused");
                }
            }
            ControllerMessage::UpdatePower { subscription } => {
                self.update_power(subscription, ctx).await?;
            }
            ControllerMessage::GetState(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControllerMessage::GetScheduleTrigger(reply) => {
                let _ = reply.send(self.schedule_trigger);
            }
            ControllerMessage::SetScheduleTrigger(value, reply) => {
                info!("schedule trigger has been {}", if value { "enabled" } else { "disabled" });
                self.schedule_trigger = value;
                let _ = reply.send(value);
            }
            ControllerMessage::GetLoads(reply) => {
                let _ = reply.send(self.load_status());
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self) {
        if !self.active.is_empty() {
            warn!(
                active = self.active.len(),
                state = %self.state,
                "controller stopped with loads on"
            );
        }
    }
}

/// Address of the running [`LoadController`].
#[derive(Clone, Debug)]
pub struct ControllerHandle(ActorHandle<ControllerMessage>);

impl ControllerHandle {
    pub fn actor(&self) -> &ActorHandle<ControllerMessage> {
        &self.0
    }

    /// Fire a trigger and wait for the guard's verdict.
    pub async fn transition(&self, trigger: Trigger) -> Result<bool, SendError> {
        self.0
            .ask(|reply| ControllerMessage::Transition { trigger, reply })
            .await
    }

    pub async fn command(&self, command: Command) -> Result<bool, SendError> {
        self.transition(command.into()).await
    }

    pub async fn halt(&self) -> Result<bool, SendError> {
        self.command(Command::Halt).await
    }

    pub async fn idle(&self) -> Result<bool, SendError> {
        self.command(Command::Idle).await
    }

    pub async fn force(&self) -> Result<bool, SendError> {
        self.command(Command::Force).await
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot, SendError> {
        self.0.ask(ControllerMessage::GetState).await
    }

    pub async fn state(&self) -> Result<ControllerState, SendError> {
        Ok(self.snapshot().await?.state)
    }

    pub async fn schedule_trigger(&self) -> Result<bool, SendError> {
        self.0.ask(ControllerMessage::GetScheduleTrigger).await
    }

    pub async fn set_schedule_trigger(&self, value: bool) -> Result<bool, SendError> {
        self.0
            .ask(|reply| ControllerMessage::SetScheduleTrigger(value, reply))
            .await
    }

    pub async fn loads(&self) -> Result<Vec<LoadStatus>, SendError> {
        self.0.ask(ControllerMessage::GetLoads).await
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::ManualClock;
    use crate::hardware::SimulatedPins;
    use crate::providers::{MockPowerSource, MockWeatherSource};
    use rstest::rstest;

    use ControllerState as S;

    #[rstest]
    #[case(S::Halt, Trigger::Halt, Some(Route::Stay))]
    #[case(S::Solar, Trigger::Halt, Some(Route::Enter(S::Halt)))]
    #[case(S::Halt, Trigger::Idle, Some(Route::Enter(S::Idle)))]
    #[case(S::Idle, Trigger::Idle, Some(Route::Stay))]
    #[case(S::Force, Trigger::Idle, Some(Route::Enter(S::Idle)))]
    #[case(S::Halt, Trigger::Force, None)]
    #[case(S::Force, Trigger::Force, None)]
    #[case(S::Schedule, Trigger::Force, Some(Route::Enter(S::Force)))]
    #[case(S::Idle, Trigger::Schedule, Some(Route::Enter(S::Schedule)))]
    #[case(S::Schedule, Trigger::Schedule, Some(Route::Stay))]
    #[case(S::Solar, Trigger::Schedule, None)]
    #[case(S::Idle, Trigger::Solar, Some(Route::Enter(S::Solar)))]
    #[case(S::Halt, Trigger::Solar, None)]
    #[case(S::Schedule, Trigger::Solar, None)]
    fn test_route(
        #[case] from: ControllerState,
        #[case] trigger: Trigger,
        #[case] expected: Option<Route>,
    ) {
        assert_eq!(route(from, trigger), expected);
    }

    struct Rig {
        controller: ControllerHandle,
        pins: Arc<SimulatedPins>,
        power: Arc<MockPowerSource>,
        weather: Arc<MockWeatherSource>,
        clock: Arc<ManualClock>,
    }

    async fn rig(power_w: f64) -> Rig {
        let registry = Arc::new(LoadRegistry::new(vec![Load::new(1, 1000), Load::new(2, 2000)]));
        let settings = ControllerSettings {
            hysteresis: Hysteresis {
                to_grid_w: 200.0,
                from_grid_w: 0.0,
            },
            window: ScheduleWindow {
                start_hour: 2,
                stop_hour: 6,
            },
            timings: ControllerTimings::default(),
        };
        let pins = Arc::new(SimulatedPins::new());
        let power = Arc::new(MockPowerSource::new(power_w));
        let weather = Arc::new(MockWeatherSource::new(0));
        let clock = Arc::new(ManualClock::at_hour(0));
        let controller = LoadController::new(
            registry,
            settings,
            pins.clone(),
            power.clone(),
            weather.clone(),
            clock.clone(),
        );
        controller.setup_pins().await.unwrap();
        let (controller, _task) = controller.spawn();
        Rig {
            controller,
            pins,
            power,
            weather,
            clock,
        }
    }

    /// Let messages the controller sent to itself run.
    async fn settle(controller: &ControllerHandle) {
        for _ in 0..4 {
            controller.snapshot().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_starts_halted() {
        let rig = rig(0.0).await;
        assert_eq!(rig.controller.state().await.unwrap(), S::Halt);
        assert!(rig.pins.history().is_empty());
        assert_eq!(rig.pins.level(1), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_subscribes_and_polls() {
        let rig = rig(0.0).await;
        assert!(rig.controller.idle().await.unwrap());
        settle(&rig.controller).await;

        assert_eq!(rig.controller.state().await.unwrap(), S::Idle);
        assert!(rig.power.has_callback());
        assert_eq!(rig.power.runs(), vec![Duration::from_secs(60)]);
        assert_eq!(rig.weather.runs(), vec![Duration::from_secs(3600)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surplus_moves_idle_to_solar() {
        let rig = rig(-2000.0).await;
        rig.controller.idle().await.unwrap();
        settle(&rig.controller).await;

        assert_eq!(rig.controller.state().await.unwrap(), S::Solar);
        assert_eq!(rig.power.runs(), vec![Duration::from_secs(60), Duration::from_secs(30)]);
        // The Idle subscription was cleared before Solar registered its own.
        assert_eq!(rig.power.registrations(), vec![true, false, true]);

        rig.power.fire();
        settle(&rig.controller).await;
        assert_eq!(rig.pins.history(), vec![(1, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_and_back_to_idle() {
        let rig = rig(0.0).await;
        assert!(!rig.controller.force().await.unwrap());

        rig.controller.idle().await.unwrap();
        assert!(rig.controller.force().await.unwrap());
        assert_eq!(rig.pins.history(), vec![(1, true), (2, true)]);
        assert!(!rig.power.has_callback());

        rig.pins.clear_history();
        assert!(rig.controller.idle().await.unwrap());
        assert_eq!(rig.pins.history(), vec![(2, false), (1, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentering_idle_does_not_toggle_pins() {
        let rig = rig(0.0).await;
        rig.controller.idle().await.unwrap();
        assert!(rig.controller.idle().await.unwrap());
        tokio::time::sleep(Duration::from_secs(200)).await;
        settle(&rig.controller).await;

        assert_eq!(rig.controller.state().await.unwrap(), S::Idle);
        assert!(rig.pins.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_trigger_is_one_shot() {
        let rig = rig(0.0).await;
        assert!(rig.controller.set_schedule_trigger(true).await.unwrap());
        assert!(rig.controller.schedule_trigger().await.unwrap());

        rig.clock.set_hour(3);
        rig.controller.idle().await.unwrap();
        settle(&rig.controller).await;

        assert_eq!(rig.controller.state().await.unwrap(), S::Schedule);
        assert!(!rig.controller.schedule_trigger().await.unwrap());
        let loads = rig.controller.loads().await.unwrap();
        assert!(loads.iter().all(|l| l.active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_stops_everything() {
        let rig = rig(0.0).await;
        rig.controller.idle().await.unwrap();
        rig.controller.force().await.unwrap();
        rig.pins.clear_history();

        assert!(rig.controller.halt().await.unwrap());
        assert_eq!(rig.pins.history(), vec![(2, false), (1, false)]);
        assert_eq!(rig.weather.cancels(), 1);
        assert!(rig.power.cancels() >= 1);

        // Already halted: accepted, nothing happens.
        rig.pins.clear_history();
        assert!(rig.controller.halt().await.unwrap());
        assert!(rig.pins.history().is_empty());
        assert_eq!(rig.weather.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_in_state() {
        let rig = rig(0.0).await;
        rig.clock.advance(chrono::Duration::seconds(90));
        let snapshot = rig.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state, S::Halt);
        assert_eq!(snapshot.time_in_state_secs, 90);

        rig.controller.idle().await.unwrap();
        let snapshot = rig.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.since, rig.clock.now());
        assert_eq!(snapshot.time_in_state_secs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_failure_stops_controller() {
        let rig = rig(0.0).await;
        rig.controller.idle().await.unwrap();
        rig.pins.fail_writes(true);

        assert!(rig.controller.force().await.is_err());
        assert!(rig.controller.actor().is_stopped());
        assert!(matches!(
            rig.controller.state().await,
            Err(SendError::ActorStopped(_)) | Err(SendError::NoReply(_))
        ));
    }
}
