//! Engine configuration
//!
//! All clinical constants live here so a deployment can tune them from a JSON
//! file. The defaults are the standard sleep-restriction protocol values.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest prescribable time in bed (minutes)
pub const DEFAULT_MIN_TIME_IN_BED: u32 = 300;

/// Highest prescribable time in bed (minutes)
pub const DEFAULT_MAX_TIME_IN_BED: u32 = 540;

/// Weekly titration step (minutes)
pub const DEFAULT_STEP_MINUTES: u32 = 15;

/// Minimum qualifying nights in the trailing window
pub const DEFAULT_MIN_ENTRIES: u32 = 5;

/// Trailing window length in days
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Tunables for baseline, titration, safety and adherence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitrationConfig {
    pub min_time_in_bed_minutes: u32,
    pub max_time_in_bed_minutes: u32,
    pub step_minutes: u32,
    /// Efficiency at or above which time in bed is extended
    pub increase_threshold_percent: f64,
    /// Efficiency at or above which time in bed is held
    pub maintain_threshold_percent: f64,
    /// Efficiency below which the user is flagged for review
    pub safety_floor_percent: f64,
    /// Baseline efficiency below which the tighter starting window is used
    pub poor_sleeper_threshold_percent: f64,
    /// Minutes added to average sleep time for poor sleepers
    pub poor_sleeper_buffer_minutes: u32,
    pub min_entries: u32,
    pub window_days: u32,
    pub adherence_tolerance_minutes: u32,
    /// Pause between users in a weekly batch
    pub inter_user_delay_ms: u64,
}

impl Default for TitrationConfig {
    fn default() -> Self {
        Self {
            min_time_in_bed_minutes: DEFAULT_MIN_TIME_IN_BED,
            max_time_in_bed_minutes: DEFAULT_MAX_TIME_IN_BED,
            step_minutes: DEFAULT_STEP_MINUTES,
            increase_threshold_percent: 85.0,
            maintain_threshold_percent: 80.0,
            safety_floor_percent: 70.0,
            poor_sleeper_threshold_percent: 75.0,
            poor_sleeper_buffer_minutes: 30,
            min_entries: DEFAULT_MIN_ENTRIES,
            window_days: DEFAULT_WINDOW_DAYS,
            adherence_tolerance_minutes: 30,
            inter_user_delay_ms: 0,
        }
    }
}

impl TitrationConfig {
    /// Load and validate a configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency of the tunables
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_time_in_bed_minutes >= self.max_time_in_bed_minutes {
            return Err(EngineError::InvalidConfig(format!(
                "min_time_in_bed_minutes ({}) must be below max_time_in_bed_minutes ({})",
                self.min_time_in_bed_minutes, self.max_time_in_bed_minutes
            )));
        }
        if self.step_minutes == 0 {
            return Err(EngineError::InvalidConfig(
                "step_minutes must be positive".to_string(),
            ));
        }
        if self.maintain_threshold_percent > self.increase_threshold_percent {
            return Err(EngineError::InvalidConfig(
                "maintain_threshold_percent exceeds increase_threshold_percent".to_string(),
            ));
        }
        if self.min_entries == 0 || self.window_days == 0 {
            return Err(EngineError::InvalidConfig(
                "min_entries and window_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp a time in bed into the prescribable range
    pub fn clamp_time_in_bed(&self, minutes: i64) -> u32 {
        minutes.clamp(
            self.min_time_in_bed_minutes as i64,
            self.max_time_in_bed_minutes as i64,
        ) as u32
    }

    pub fn inter_user_delay(&self) -> Option<Duration> {
        (self.inter_user_delay_ms > 0).then(|| Duration::from_millis(self.inter_user_delay_ms))
    }
}
