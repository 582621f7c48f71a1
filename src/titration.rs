//! Weekly titration
//!
//! A three-zone controller on average sleep efficiency: extend time in bed by
//! one step when efficiency is high, hold it in the middle band, and cut it by
//! one step when efficiency is low. Time in bed never leaves the configured
//! bounds, and a step that the bounds swallow is reported as `Maintain`.

use crate::baseline::{entries_needed, NightlyAverages};
use crate::clock::derive_bedtime;
use crate::config::TitrationConfig;
use crate::error::EngineError;
use crate::types::{
    Assessment, DecisionKind, Observation, PrescribedWindow, UserProgramState, WindowDecision,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one controller step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitrationStep {
    pub time_in_bed_minutes: u32,
    pub decision: DecisionKind,
    pub adjustment_minutes: u32,
}

/// Apply the decision table to `current_time_in_bed` given average efficiency
pub fn titrate(
    config: &TitrationConfig,
    avg_efficiency_percent: f64,
    current_time_in_bed: u32,
) -> TitrationStep {
    let current = i64::from(current_time_in_bed);
    let step = i64::from(config.step_minutes);

    let (next, decision) = if avg_efficiency_percent >= config.increase_threshold_percent {
        let next = config.clamp_time_in_bed(current + step);
        let decision = if i64::from(next) > current {
            DecisionKind::Increase
        } else {
            DecisionKind::Maintain
        };
        (next, decision)
    } else if avg_efficiency_percent >= config.maintain_threshold_percent {
        (config.clamp_time_in_bed(current), DecisionKind::Maintain)
    } else {
        let next = config.clamp_time_in_bed(current - step);
        let decision = if i64::from(next) < current {
            DecisionKind::Decrease
        } else {
            DecisionKind::Maintain
        };
        (next, decision)
    };

    let adjustment_minutes = match decision {
        DecisionKind::Maintain => 0,
        _ => next.abs_diff(current_time_in_bed),
    };
    TitrationStep {
        time_in_bed_minutes: next,
        decision,
        adjustment_minutes,
    }
}

/// Compute next week's window from the current one and the past week's nights
pub fn assess_weekly(
    config: &TitrationConfig,
    state: &UserProgramState,
    current: &PrescribedWindow,
    observations: &[Observation],
    week_start_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Assessment<WindowDecision>, EngineError> {
    let wake = state
        .target_wake_time
        .ok_or(EngineError::MissingTargetWakeTime)?;
    let current_tib = current.time_in_bed_minutes;
    if !(config.min_time_in_bed_minutes..=config.max_time_in_bed_minutes).contains(&current_tib) {
        return Err(EngineError::Computation(format!(
            "current window {} has time in bed {current_tib} outside [{}, {}]",
            current.id, config.min_time_in_bed_minutes, config.max_time_in_bed_minutes
        )));
    }
    if let Some(entries_needed) = entries_needed(config, observations.len()) {
        return Ok(Assessment::InsufficientData { entries_needed });
    }
    let averages = NightlyAverages::from_observations(observations)
        .ok_or_else(|| EngineError::Computation("no observations to average".to_string()))?;
    let efficiency = averages.sleep_efficiency_percent;
    if !efficiency.is_finite() {
        return Err(EngineError::Computation(format!(
            "non-finite average efficiency for user {}",
            state.user_id
        )));
    }

    let step = titrate(config, efficiency, current.time_in_bed_minutes);
    let window = PrescribedWindow {
        id: Uuid::new_v4(),
        user_id: state.user_id,
        week_start_date,
        prescribed_bedtime: derive_bedtime(wake, step.time_in_bed_minutes),
        prescribed_wake_time: wake,
        time_in_bed_minutes: step.time_in_bed_minutes,
        avg_sleep_efficiency_percent: Some(efficiency),
        decision: step.decision,
        adjustment_minutes: step.adjustment_minutes,
        created_at: now,
    };

    Ok(Assessment::Ready(WindowDecision {
        window,
        previous_time_in_bed_minutes: Some(current.time_in_bed_minutes),
        flagged: efficiency < config.safety_floor_percent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::tests::night;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn config() -> TitrationConfig {
        TitrationConfig::default()
    }

    fn step(t: u32, decision: DecisionKind, adjustment: u32) -> TitrationStep {
        TitrationStep {
            time_in_bed_minutes: t,
            decision,
            adjustment_minutes: adjustment,
        }
    }

    #[test]
    fn test_decision_table() {
        let c = config();
        assert_eq!(titrate(&c, 90.0, 420), step(435, DecisionKind::Increase, 15));
        assert_eq!(titrate(&c, 85.0, 420), step(435, DecisionKind::Increase, 15));
        assert_eq!(titrate(&c, 84.9, 420), step(420, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 80.0, 420), step(420, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 79.9, 420), step(405, DecisionKind::Decrease, 15));
        assert_eq!(titrate(&c, 65.0, 420), step(405, DecisionKind::Decrease, 15));
    }

    #[test]
    fn test_ceiling_degrades_to_maintain() {
        let c = config();
        assert_eq!(titrate(&c, 95.0, 540), step(540, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 95.0, 530), step(540, DecisionKind::Increase, 10));
    }

    #[test]
    fn test_floor_degrades_to_maintain() {
        let c = config();
        assert_eq!(titrate(&c, 50.0, 300), step(300, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 50.0, 310), step(300, DecisionKind::Decrease, 10));
    }

    #[test]
    fn test_out_of_range_input_maintains_without_adjustment() {
        let c = config();
        assert_eq!(titrate(&c, 95.0, 560), step(540, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 82.0, 280), step(300, DecisionKind::Maintain, 0));
        assert_eq!(titrate(&c, 60.0, 290), step(300, DecisionKind::Maintain, 0));
    }

    #[test]
    fn test_output_always_within_bounds() {
        let c = config();
        let mut efficiency = 0.0;
        while efficiency <= 100.0 {
            for t in 300..=540 {
                let result = titrate(&c, efficiency, t);
                assert!((300..=540).contains(&result.time_in_bed_minutes));
            }
            efficiency += 2.5;
        }
    }

    fn current_window(user_id: Uuid, time_in_bed: u32) -> PrescribedWindow {
        PrescribedWindow {
            id: Uuid::new_v4(),
            user_id,
            week_start_date: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            prescribed_bedtime: derive_bedtime("07:00".parse().unwrap(), time_in_bed),
            prescribed_wake_time: "07:00".parse().unwrap(),
            time_in_bed_minutes: time_in_bed,
            avg_sleep_efficiency_percent: None,
            decision: DecisionKind::Baseline,
            adjustment_minutes: 0,
            created_at: Utc::now(),
        }
    }

    fn week_of_nights(user_id: Uuid, count: i64, awake: u32) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        (0..count)
            .map(|i| night(user_id, start + Duration::days(i), "00:00", 420, awake))
            .collect()
    }

    fn state(user_id: Uuid) -> UserProgramState {
        let mut state = UserProgramState::new(user_id);
        state.target_wake_time = Some("07:00".parse().unwrap());
        state
    }

    #[test]
    fn test_weekly_increase_at_ninety_percent() {
        let user = Uuid::new_v4();
        // 420 in bed, 42 awake: 90%
        let decision = assess_weekly(
            &config(),
            &state(user),
            &current_window(user, 420),
            &week_of_nights(user, 7, 42),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Utc::now(),
        )
        .unwrap()
        .ready()
        .unwrap();

        assert_eq!(decision.window.decision, DecisionKind::Increase);
        assert_eq!(decision.window.time_in_bed_minutes, 435);
        assert_eq!(decision.window.prescribed_bedtime.to_string(), "23:45");
        assert_eq!(decision.previous_time_in_bed_minutes, Some(420));
        assert!(!decision.flagged);
    }

    #[test]
    fn test_weekly_decrease_and_flag_at_sixty_five_percent() {
        let user = Uuid::new_v4();
        // 420 in bed, 147 awake: 65%
        let decision = assess_weekly(
            &config(),
            &state(user),
            &current_window(user, 420),
            &week_of_nights(user, 7, 147),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Utc::now(),
        )
        .unwrap()
        .ready()
        .unwrap();

        assert_eq!(decision.window.decision, DecisionKind::Decrease);
        assert_eq!(decision.window.time_in_bed_minutes, 405);
        assert_eq!(decision.window.adjustment_minutes, 15);
        assert!(decision.flagged);
    }

    #[test]
    fn test_weekly_insufficient_data() {
        let user = Uuid::new_v4();
        let result = assess_weekly(
            &config(),
            &state(user),
            &current_window(user, 420),
            &week_of_nights(user, 4, 42),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result, Assessment::InsufficientData { entries_needed: 1 });
    }

    #[test]
    fn test_weekly_requires_wake_time() {
        let user = Uuid::new_v4();
        let result = assess_weekly(
            &config(),
            &UserProgramState::new(user),
            &current_window(user, 420),
            &week_of_nights(user, 7, 42),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Utc::now(),
        );
        assert!(matches!(result, Err(EngineError::MissingTargetWakeTime)));
    }

    #[test]
    fn test_weekly_rejects_current_window_out_of_bounds() {
        let user = Uuid::new_v4();
        for time_in_bed in [295, 560] {
            let result = assess_weekly(
                &config(),
                &state(user),
                &current_window(user, time_in_bed),
                &week_of_nights(user, 7, 42),
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                Utc::now(),
            );
            assert!(matches!(result, Err(EngineError::Computation(_))));
        }
    }
}
