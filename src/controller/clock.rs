use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use parking_lot::Mutex;

/// Wall-clock source for schedule decisions.
pub trait Clock: Send + Sync {
    /// Local time.
    fn now(&self) -> NaiveDateTime;

    fn hour(&self) -> u32 {
        self.now().hour()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 2020-06-07 at `hour`:00.
    pub fn at_hour(hour: u32) -> Self {
        let now = NaiveDate::from_ymd_opt(2020, 6, 7)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap_or_default();
        Self::new(now)
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    /// Keep the date, move to `hour`:00.
    pub fn set_hour(&self, hour: u32) {
        let mut now = self.now.lock();
        if let Some(moved) = now.date().and_hms_opt(hour, 0, 0) {
            *now = moved;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}
