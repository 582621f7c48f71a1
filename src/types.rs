//! Core types for the titration engine
//!
//! This module defines the records that flow between the calculators, the
//! repositories and the weekly orchestrator: nightly observations, prescribed
//! windows, and per-user program state.

use crate::clock::TimeOfDay;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User identifier
pub type UserId = Uuid;

/// Where an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    Manual,
    Device,
}

/// Metrics derived from one night's raw timestamps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepMetrics {
    /// Elapsed minutes from bedtime to out-of-bed
    pub time_in_bed_minutes: u32,
    /// Time in bed minus onset latency and wake after onset
    pub total_sleep_time_minutes: u32,
    /// Total sleep time / time in bed (0-100)
    pub sleep_efficiency_percent: f64,
}

/// Raw nightly sleep diary entry, as entered by the user or imported from a device.
///
/// Timestamps are local wall-clock times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationInput {
    /// Night this entry describes (the calendar day the user went to bed)
    pub date: NaiveDate,
    pub bedtime: NaiveDateTime,
    pub final_wake_time: NaiveDateTime,
    pub out_of_bed_time: NaiveDateTime,
    pub sleep_onset_latency_minutes: u32,
    pub wake_after_sleep_onset_minutes: u32,
    /// Self-rated quality (1-10)
    pub subjective_quality: u8,
    #[serde(default = "default_source")]
    pub source: ObservationSource,
}

fn default_source() -> ObservationSource {
    ObservationSource::Manual
}

/// Stored nightly observation with its derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub bedtime: NaiveDateTime,
    pub final_wake_time: NaiveDateTime,
    pub out_of_bed_time: NaiveDateTime,
    pub sleep_onset_latency_minutes: u32,
    pub wake_after_sleep_onset_minutes: u32,
    pub subjective_quality: u8,
    pub source: ObservationSource,
    #[serde(flatten)]
    pub metrics: SleepMetrics,
    pub created_at: DateTime<Utc>,
}

/// How a prescribed window relates to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Baseline,
    Increase,
    Decrease,
    Maintain,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Baseline => "baseline",
            DecisionKind::Increase => "increase",
            DecisionKind::Decrease => "decrease",
            DecisionKind::Maintain => "maintain",
        }
    }
}

/// One week's sleep prescription. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescribedWindow {
    pub id: Uuid,
    pub user_id: UserId,
    /// Monday of the week this window governs
    pub week_start_date: NaiveDate,
    pub prescribed_bedtime: TimeOfDay,
    pub prescribed_wake_time: TimeOfDay,
    pub time_in_bed_minutes: u32,
    /// Average efficiency that produced this decision
    pub avg_sleep_efficiency_percent: Option<f64>,
    pub decision: DecisionKind,
    /// Magnitude of change against the preceding window
    pub adjustment_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl PrescribedWindow {
    /// Decision payload handed to the message-generation collaborator
    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary {
            decision: self.decision,
            adjustment_minutes: self.adjustment_minutes,
            avg_efficiency_percent: self.avg_sleep_efficiency_percent,
            new_time_in_bed_minutes: self.time_in_bed_minutes,
            prescribed_bedtime: self.prescribed_bedtime,
            prescribed_wake_time: self.prescribed_wake_time,
            week_start_date: self.week_start_date,
        }
    }
}

/// Read-only view of a decision, consumed by text generators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub decision: DecisionKind,
    pub adjustment_minutes: u32,
    pub avg_efficiency_percent: Option<f64>,
    pub new_time_in_bed_minutes: u32,
    pub prescribed_bedtime: TimeOfDay,
    pub prescribed_wake_time: TimeOfDay,
    pub week_start_date: NaiveDate,
}

/// Clinician review state. Moves from `Clear` to `Flagged` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewFlag {
    #[default]
    Clear,
    Flagged {
        reason: String,
        flagged_at: DateTime<Utc>,
    },
}

/// Per-user program state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgramState {
    pub user_id: UserId,
    pub program_start_date: Option<NaiveDate>,
    baseline_complete: bool,
    pub target_wake_time: Option<TimeOfDay>,
    #[serde(default)]
    review: ReviewFlag,
}

impl UserProgramState {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            program_start_date: None,
            baseline_complete: false,
            target_wake_time: None,
            review: ReviewFlag::Clear,
        }
    }

    pub fn baseline_complete(&self) -> bool {
        self.baseline_complete
    }

    /// Leave the baseline-collection phase. There is no way back.
    pub fn mark_baseline_complete(&mut self) {
        self.baseline_complete = true;
    }

    pub fn review(&self) -> &ReviewFlag {
        &self.review
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self.review, ReviewFlag::Flagged { .. })
    }

    pub fn flag_reason(&self) -> Option<&str> {
        match &self.review {
            ReviewFlag::Flagged { reason, .. } => Some(reason),
            ReviewFlag::Clear => None,
        }
    }

    /// Flag for review, overwriting any earlier reason. The first flag time is kept.
    pub fn flag(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        let flagged_at = match &self.review {
            ReviewFlag::Flagged { flagged_at, .. } => *flagged_at,
            ReviewFlag::Clear => at,
        };
        self.review = ReviewFlag::Flagged {
            reason: reason.into(),
            flagged_at,
        };
    }

    /// Clinician sign-off. Never called by the engine itself.
    pub fn resolve_review(&mut self) {
        self.review = ReviewFlag::Clear;
    }
}

/// Outcome of a computation that needs a minimum number of nights
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment<T> {
    Ready(T),
    /// Not enough observations yet; wait for more nights
    InsufficientData { entries_needed: u32 },
}

impl<T> Assessment<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Assessment::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Assessment::Ready(value) => Some(value),
            Assessment::InsufficientData { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Assessment<U> {
        match self {
            Assessment::Ready(value) => Assessment::Ready(f(value)),
            Assessment::InsufficientData { entries_needed } => {
                Assessment::InsufficientData { entries_needed }
            }
        }
    }
}

/// A freshly computed window plus the side information callers report on
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDecision {
    pub window: PrescribedWindow,
    /// Time in bed of the window this one replaces
    pub previous_time_in_bed_minutes: Option<u32>,
    /// Whether the safety floor was crossed this cycle
    pub flagged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_flag_is_one_way() {
        let mut state = UserProgramState::new(Uuid::new_v4());
        assert!(!state.is_flagged());

        let first = Utc::now();
        state.flag("Low baseline SE: 62%", first);
        state.flag("Persistent low SE: 65%", first + chrono::Duration::days(7));

        assert!(state.is_flagged());
        assert_eq!(state.flag_reason(), Some("Persistent low SE: 65%"));
        match state.review() {
            ReviewFlag::Flagged { flagged_at, .. } => assert_eq!(*flagged_at, first),
            ReviewFlag::Clear => panic!("expected flagged"),
        }

        state.resolve_review();
        assert_eq!(state.review(), &ReviewFlag::Clear);
    }

    #[test]
    fn test_baseline_complete_is_monotonic() {
        let mut state = UserProgramState::new(Uuid::new_v4());
        state.mark_baseline_complete();
        state.mark_baseline_complete();
        assert!(state.baseline_complete());
    }

    #[test]
    fn test_review_flag_serialization() {
        let mut state = UserProgramState::new(Uuid::new_v4());
        state.flag("Persistent low SE: 65%", Utc::now());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["review"]["status"], "flagged");
        assert_eq!(json["review"]["reason"], "Persistent low SE: 65%");
    }

    #[test]
    fn test_assessment_map() {
        let ready: Assessment<u32> = Assessment::Ready(2);
        assert_eq!(ready.map(|v| v * 2), Assessment::Ready(4));
        let waiting: Assessment<u32> = Assessment::InsufficientData { entries_needed: 1 };
        assert!(!waiting.is_ready());
        assert_eq!(waiting.ready(), None);
    }
}
