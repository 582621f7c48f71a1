//! Sleep metrics calculation
//!
//! Derives time in bed, total sleep time and sleep efficiency from one night's
//! raw diary fields. Time in bed always comes from absolute timestamps, so
//! nights that cross midnight need no special handling.

use crate::error::EngineError;
use crate::types::{ObservationInput, SleepMetrics};
use chrono::NaiveDateTime;

/// Upper bound for onset latency and wake after sleep onset (minutes)
pub const MAX_LATENCY_MINUTES: u32 = 600;

/// Compute derived metrics for one night.
///
/// Total for any input: a zero or negative time in bed yields zero efficiency.
/// Ordering of the timestamps is validated by [`validate_observation`].
pub fn compute_sleep_metrics(
    bedtime: NaiveDateTime,
    out_of_bed_time: NaiveDateTime,
    onset_latency_minutes: u32,
    wake_after_onset_minutes: u32,
) -> SleepMetrics {
    let time_in_bed = (out_of_bed_time - bedtime).num_minutes().max(0);
    let total_sleep = (time_in_bed
        - i64::from(onset_latency_minutes)
        - i64::from(wake_after_onset_minutes))
    .max(0);

    let sleep_efficiency_percent = if time_in_bed > 0 {
        total_sleep as f64 * 100.0 / time_in_bed as f64
    } else {
        0.0
    };

    SleepMetrics {
        time_in_bed_minutes: time_in_bed as u32,
        total_sleep_time_minutes: total_sleep as u32,
        sleep_efficiency_percent,
    }
}

impl SleepMetrics {
    pub fn from_input(input: &ObservationInput) -> Self {
        compute_sleep_metrics(
            input.bedtime,
            input.out_of_bed_time,
            input.sleep_onset_latency_minutes,
            input.wake_after_sleep_onset_minutes,
        )
    }
}

/// Reject entries that cannot describe a real night
pub fn validate_observation(input: &ObservationInput) -> Result<(), EngineError> {
    if input.out_of_bed_time <= input.bedtime {
        return Err(EngineError::InvalidObservation(format!(
            "out-of-bed time {} is not after bedtime {}",
            input.out_of_bed_time, input.bedtime
        )));
    }
    if input.final_wake_time < input.bedtime || input.final_wake_time > input.out_of_bed_time {
        return Err(EngineError::InvalidObservation(format!(
            "final wake time {} is outside the time in bed",
            input.final_wake_time
        )));
    }
    if input.sleep_onset_latency_minutes > MAX_LATENCY_MINUTES {
        return Err(EngineError::InvalidObservation(format!(
            "sleep onset latency {} exceeds {MAX_LATENCY_MINUTES} minutes",
            input.sleep_onset_latency_minutes
        )));
    }
    if input.wake_after_sleep_onset_minutes > MAX_LATENCY_MINUTES {
        return Err(EngineError::InvalidObservation(format!(
            "wake after sleep onset {} exceeds {MAX_LATENCY_MINUTES} minutes",
            input.wake_after_sleep_onset_minutes
        )));
    }
    if !(1..=10).contains(&input.subjective_quality) {
        return Err(EngineError::InvalidObservation(format!(
            "subjective quality {} is outside 1-10",
            input.subjective_quality
        )));
    }
    Ok(())
}
