//! Wall-clock arithmetic
//!
//! Prescriptions are expressed as time-of-day strings (`HH:MM`) rather than full
//! timestamps, so every comparison across midnight goes through minutes from
//! midnight with an explicit rollover rule instead of date subtraction.

use crate::error::EngineError;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minutes in one calendar day
pub const MINUTES_PER_DAY: i64 = 1440;

/// A wall-clock time of day with minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    minutes: u16,
}

impl TimeOfDay {
    /// Build from hour and minute components
    pub fn from_hm(hour: u32, minute: u32) -> Result<Self, EngineError> {
        if hour > 23 || minute > 59 {
            return Err(EngineError::InvalidTime(format!("{hour}:{minute}")));
        }
        Ok(Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    /// Build from any minute offset, wrapping into a single day
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            minutes: minutes.rem_euclid(MINUTES_PER_DAY) as u16,
        }
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.minutes / 60)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minutes % 60)
    }

    pub fn minutes_since_midnight(&self) -> i64 {
        i64::from(self.minutes)
    }

    /// Position on a night-centred number line: afternoon and evening times
    /// (hour >= 12) become negative offsets before the coming midnight, so
    /// 23:00 is -60 and 00:30 is 30.
    pub fn night_minutes(&self) -> i64 {
        let minutes = self.minutes_since_midnight();
        if self.hour() >= 12 {
            minutes - MINUTES_PER_DAY
        } else {
            minutes
        }
    }

    /// Forward distance in minutes from `self` to the next occurrence of `later`
    pub fn minutes_until(&self, later: TimeOfDay) -> u32 {
        (later.minutes_since_midnight() - self.minutes_since_midnight()).rem_euclid(MINUTES_PER_DAY)
            as u32
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self {
            minutes: (time.hour() * 60 + time.minute()) as u16,
        }
    }
}

impl FromStr for TimeOfDay {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self::from)
            .map_err(|e| EngineError::InvalidTime(format!("{s}: {e}")))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Bedtime that yields `time_in_bed_minutes` before `wake`.
///
/// Wraps past midnight, so a result later in the clock than `wake` means the
/// night before.
pub fn derive_bedtime(wake: TimeOfDay, time_in_bed_minutes: u32) -> TimeOfDay {
    TimeOfDay::from_minutes(wake.minutes_since_midnight() - i64::from(time_in_bed_minutes))
}

/// String form of [`derive_bedtime`]: `calculate_bedtime("07:00", 480) == "23:00"`
pub fn calculate_bedtime(wake: &str, time_in_bed_minutes: u32) -> Result<String, EngineError> {
    let wake: TimeOfDay = wake.parse()?;
    Ok(derive_bedtime(wake, time_in_bed_minutes).to_string())
}

/// Monday on or before `date`
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Monday of the week that follows a week ending on `week_end`
pub fn week_after(week_end: NaiveDate) -> NaiveDate {
    week_start_of(week_end + Duration::days(1))
}

/// Inclusive date range `[end - days, end]`
pub fn trailing_range(end: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    (end - Duration::days(i64::from(days)), end)
}
