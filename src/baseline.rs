//! Baseline aggregation
//!
//! Turns the nights collected during the observation-only phase into the first
//! prescribed window. Users whose average efficiency is poor start from their
//! average sleep time plus a small buffer instead of their average time in bed.

use crate::clock::derive_bedtime;
use crate::config::TitrationConfig;
use crate::error::EngineError;
use crate::types::{
    Assessment, DecisionKind, Observation, PrescribedWindow, UserProgramState, WindowDecision,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Averages over a set of nights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NightlyAverages {
    pub nights: u32,
    pub sleep_efficiency_percent: f64,
    pub time_in_bed_minutes: f64,
    pub total_sleep_time_minutes: f64,
}

impl NightlyAverages {
    /// Average the derived metrics. Returns `None` for an empty slice.
    pub fn from_observations(observations: &[Observation]) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }

        Some(Self {
            nights: observations.len() as u32,
            sleep_efficiency_percent: mean(observations, |o| o.metrics.sleep_efficiency_percent),
            time_in_bed_minutes: mean(observations, |o| {
                f64::from(o.metrics.time_in_bed_minutes)
            }),
            total_sleep_time_minutes: mean(observations, |o| {
                f64::from(o.metrics.total_sleep_time_minutes)
            }),
        })
    }
}

fn mean(observations: &[Observation], value: impl Fn(&Observation) -> f64) -> f64 {
    observations.iter().map(value).sum::<f64>() / observations.len() as f64
}

/// Nights still missing before `count` reaches the configured minimum
pub fn entries_needed(config: &TitrationConfig, count: usize) -> Option<u32> {
    let have = u32::try_from(count).unwrap_or(u32::MAX);
    (have < config.min_entries).then(|| config.min_entries - have)
}

/// Starting time in bed for a user with the given baseline averages
pub fn initial_time_in_bed(config: &TitrationConfig, averages: &NightlyAverages) -> u32 {
    if averages.sleep_efficiency_percent < config.poor_sleeper_threshold_percent {
        let tightened = averages.total_sleep_time_minutes.round() as i64
            + i64::from(config.poor_sleeper_buffer_minutes);
        config.clamp_time_in_bed(tightened)
    } else {
        config.clamp_time_in_bed(averages.time_in_bed_minutes.round() as i64)
    }
}

/// Compute the baseline window from the trailing observations.
///
/// Preconditions are checked in order: target wake time, baseline phase
/// completion, then the number of qualifying nights.
pub fn assess_baseline(
    config: &TitrationConfig,
    state: &UserProgramState,
    observations: &[Observation],
    week_start_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Assessment<WindowDecision>, EngineError> {
    let wake = state
        .target_wake_time
        .ok_or(EngineError::MissingTargetWakeTime)?;
    if !state.baseline_complete() {
        return Err(EngineError::BaselineIncomplete);
    }
    if let Some(entries_needed) = entries_needed(config, observations.len()) {
        return Ok(Assessment::InsufficientData { entries_needed });
    }
    let averages = NightlyAverages::from_observations(observations)
        .ok_or_else(|| EngineError::Computation("no observations to average".to_string()))?;
    if !averages.sleep_efficiency_percent.is_finite() {
        return Err(EngineError::Computation(format!(
            "non-finite average efficiency for user {}",
            state.user_id
        )));
    }

    let time_in_bed = initial_time_in_bed(config, &averages);
    let window = PrescribedWindow {
        id: Uuid::new_v4(),
        user_id: state.user_id,
        week_start_date,
        prescribed_bedtime: derive_bedtime(wake, time_in_bed),
        prescribed_wake_time: wake,
        time_in_bed_minutes: time_in_bed,
        avg_sleep_efficiency_percent: Some(averages.sleep_efficiency_percent),
        decision: DecisionKind::Baseline,
        adjustment_minutes: 0,
        created_at: now,
    };

    Ok(Assessment::Ready(WindowDecision {
        window,
        previous_time_in_bed_minutes: None,
        flagged: averages.sleep_efficiency_percent < config.safety_floor_percent,
    }))
}
