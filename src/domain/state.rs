use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Operating state of the load controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControllerState {
    /// Everything off, providers stopped.
    Halt,
    /// Waiting for surplus or for the schedule window.
    Idle,
    /// Every load on until told otherwise.
    Force,
    /// Every load on until the schedule window closes.
    Schedule,
    /// Loads follow the measured surplus.
    Solar,
}

/// Event that may move the controller to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Trigger {
    Halt,
    Idle,
    Force,
    Schedule,
    Solar,
}

/// The subset of triggers exposed to external callers. Schedule and Solar
/// are only reachable by the machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Halt,
    Idle,
    Force,
}

impl From<Command> for Trigger {
    fn from(c: Command) -> Self {
        match c {
            Command::Halt => Trigger::Halt,
            Command::Idle => Trigger::Idle,
            Command::Force => Trigger::Force,
        }
    }
}

/// Power margins (W) around the grid connection point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hysteresis {
    /// Export margin required before switching a load on.
    pub to_grid_w: f64,
    /// Import tolerated before switching a load off.
    pub from_grid_w: f64,
}

/// Hour-of-day window `[start, stop)` in which scheduled heating may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_hour: u32,
    pub stop_hour: u32,
}

impl ScheduleWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.stop_hour
    }

    pub fn is_over(&self, hour: u32) -> bool {
        hour >= self.stop_hour
    }
}
