use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Coarse time-of-day classification used for wake rules and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimePeriod {
    /// Morning 06-12, afternoon 12-18, evening 18-22, night 22-06.
    pub fn of_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            18..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// A moment of simulated time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSnapshot {
    pub world_time: DateTime<Utc>,
    pub tick: u64,
    pub start_date: DateTime<Utc>,
}

impl TimeSnapshot {
    pub fn new(world_time: DateTime<Utc>, tick: u64, start_date: DateTime<Utc>) -> Self {
        Self {
            world_time,
            tick,
            start_date,
        }
    }

    pub fn period(&self) -> TimePeriod {
        TimePeriod::of_hour(self.world_time.hour())
    }

    /// Day number relative to the start date, 1-based.
    pub fn day_number(&self) -> i64 {
        let elapsed = self.world_time.date_naive().num_days_from_ce()
            - self.start_date.date_naive().num_days_from_ce();
        i64::from(elapsed) + 1
    }

    /// Wall-clock rendering for display surfaces, `HH:MM`.
    pub fn clock(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.world_time.hour(),
            self.world_time.minute()
        )
    }
}
