//! Adherence evaluation
//!
//! Reports how many nights the user actually went to bed and woke within a
//! tolerance of the prescribed window. Display only: the result never feeds
//! back into titration.
//!
//! All four times (actual and prescribed, bed and wake) go through the same
//! [`TimeOfDay::night_minutes`] normalization, so 23:00 and 00:30 sit 90
//! minutes apart on one number line.

use crate::clock::TimeOfDay;
use crate::config::TitrationConfig;
use crate::types::{Observation, PrescribedWindow};
use chrono::NaiveDate;

/// The window governing `end`: the latest one whose week starts on or before it
pub fn governing_window(windows: &[PrescribedWindow], end: NaiveDate) -> Option<&PrescribedWindow> {
    windows
        .iter()
        .filter(|w| w.week_start_date <= end)
        .max_by_key(|w| w.week_start_date)
}

fn within(actual: TimeOfDay, prescribed: TimeOfDay, tolerance: i64) -> bool {
    (actual.night_minutes() - prescribed.night_minutes()).abs() <= tolerance
}

/// Whether one night's bedtime and final wake both fell within tolerance
pub fn night_is_adherent(
    config: &TitrationConfig,
    window: &PrescribedWindow,
    observation: &Observation,
) -> bool {
    let tolerance = i64::from(config.adherence_tolerance_minutes);
    let bedtime = TimeOfDay::from(observation.bedtime.time());
    let wake = TimeOfDay::from(observation.final_wake_time.time());

    within(bedtime, window.prescribed_bedtime, tolerance)
        && within(wake, window.prescribed_wake_time, tolerance)
}

/// Rounded percentage of adherent nights, or `None` when there are no nights
pub fn adherence_percent(
    config: &TitrationConfig,
    window: &PrescribedWindow,
    observations: &[Observation],
) -> Option<u32> {
    if observations.is_empty() {
        return None;
    }
    let adherent = observations
        .iter()
        .filter(|o| night_is_adherent(config, window, o))
        .count();
    Some((adherent as f64 * 100.0 / observations.len() as f64).round() as u32)
}
