//! Titration engine
//!
//! Binds the pure calculators to the repositories: logging nights, computing
//! the baseline and weekly windows, flagging low efficiency, and reporting
//! adherence for a user.

use crate::adherence::adherence_percent;
use crate::baseline::assess_baseline;
use crate::clock::{trailing_range, week_after, week_start_of, TimeOfDay};
use crate::config::TitrationConfig;
use crate::error::EngineError;
use crate::metrics::validate_observation;
use crate::repository::ProgramStore;
use crate::safety::{baseline_reason, weekly_reason, SafetyMonitor};
use crate::titration::assess_weekly;
use crate::types::{
    Assessment, DecisionKind, Observation, ObservationInput, PrescribedWindow, SleepMetrics,
    UserId, UserProgramState, WindowDecision,
};
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

/// Per-user entry point over a [`ProgramStore`]
pub struct TitrationEngine<'a, S: ?Sized> {
    store: &'a S,
    config: TitrationConfig,
}

impl<'a, S: ProgramStore + ?Sized> TitrationEngine<'a, S> {
    /// Engine with default clinical constants
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            config: TitrationConfig::default(),
        }
    }

    /// Engine with a validated custom configuration
    pub fn with_config(store: &'a S, config: TitrationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &TitrationConfig {
        &self.config
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Set the wake time every prescription is anchored to
    pub fn set_target_wake_time(
        &self,
        user_id: UserId,
        wake: TimeOfDay,
    ) -> Result<UserProgramState, EngineError> {
        self.store
            .update_user(user_id, &mut |state: &mut UserProgramState| {
                state.target_wake_time = Some(wake)
            })
    }

    /// Record one night. Starts the program on first use and closes the
    /// baseline phase once enough nights sit in the trailing window.
    pub fn log_observation(
        &self,
        user_id: UserId,
        input: ObservationInput,
    ) -> Result<Observation, EngineError> {
        validate_observation(&input)?;
        let stored = self
            .store
            .create_observation(build_observation(user_id, Uuid::new_v4(), input))?;

        let date = stored.date;
        let baseline_ready = self.baseline_window_filled(user_id, date)?;

        let state = self
            .store
            .update_user(user_id, &mut |state: &mut UserProgramState| {
                if state.program_start_date.is_none() {
                    state.program_start_date = Some(date);
                }
                if baseline_ready {
                    state.mark_baseline_complete();
                }
            })?;
        debug!(
            %user_id,
            %date,
            efficiency = stored.metrics.sleep_efficiency_percent,
            baseline_complete = state.baseline_complete(),
            "observation logged"
        );
        Ok(stored)
    }

    /// Whether any trailing window containing `date` now holds enough nights.
    ///
    /// Nights may arrive in any order, so every window ending between `date`
    /// and `date + window_days` is checked, not only the one ending on `date`.
    fn baseline_window_filled(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<bool, EngineError> {
        let span = Duration::days(i64::from(self.config.window_days));
        let nights: Vec<NaiveDate> = self
            .store
            .find_observations(user_id, date - span, date + span)?
            .into_iter()
            .map(|o| o.date)
            .collect();
        let needed = self.config.min_entries as usize;

        Ok((0..=span.num_days()).any(|offset| {
            let end = date + Duration::days(offset);
            let (from, to) = trailing_range(end, self.config.window_days);
            nights.iter().filter(|d| (from..=to).contains(*d)).count() >= needed
        }))
    }

    /// Replace an existing night's entry and recompute its metrics
    pub fn correct_observation(
        &self,
        user_id: UserId,
        input: ObservationInput,
    ) -> Result<Observation, EngineError> {
        validate_observation(&input)?;
        let existing = self
            .store
            .find_observations(user_id, input.date, input.date)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ObservationNotFound(input.date.to_string()))?;
        let corrected = build_observation(user_id, existing.id, input);
        info!(%user_id, date = %corrected.date, "observation corrected");
        self.store.replace_observation(corrected)
    }

    /// Baseline window for the week containing `as_of`, from the trailing nights
    pub fn compute_baseline(
        &self,
        user_id: UserId,
        as_of: NaiveDate,
    ) -> Result<Assessment<WindowDecision>, EngineError> {
        self.baseline_for_week(user_id, as_of, week_start_of(as_of))
    }

    /// Compute and store the baseline window for the week containing `as_of`
    pub fn establish_baseline(
        &self,
        user_id: UserId,
        as_of: NaiveDate,
    ) -> Result<Assessment<WindowDecision>, EngineError> {
        match self.compute_baseline(user_id, as_of)? {
            Assessment::Ready(decision) => {
                self.save_window(&decision.window)?;
                Ok(Assessment::Ready(decision))
            }
            waiting => Ok(waiting),
        }
    }

    /// Next week's window from the week ending on `week_end`.
    ///
    /// Falls back to the baseline computation when the user has no window yet.
    pub fn compute_weekly_adjustment(
        &self,
        user_id: UserId,
        week_end: NaiveDate,
    ) -> Result<Assessment<WindowDecision>, EngineError> {
        let target_week = week_after(week_end);
        let current = match self.store.find_window_on_or_before(user_id, week_end)? {
            Some(window) => window,
            None => {
                debug!(%user_id, "no prescribed window yet, computing baseline");
                return self.baseline_for_week(user_id, week_end, target_week);
            }
        };

        let state = self.store.load_user(user_id)?;
        let (from, to) = trailing_range(week_end, self.config.window_days);
        let observations = self.store.find_observations(user_id, from, to)?;
        let assessment = assess_weekly(
            &self.config,
            &state,
            &current,
            &observations,
            target_week,
            Utc::now(),
        )?;
        self.flag_if_needed(&assessment);
        Ok(assessment)
    }

    /// Percentage of nights in `[start, end]` that matched the governing window
    pub fn compute_adherence(
        &self,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<u32>, EngineError> {
        let Some(window) = self.store.find_window_on_or_before(user_id, end)? else {
            return Ok(None);
        };
        let observations = self.store.find_observations(user_id, start, end)?;
        Ok(adherence_percent(&self.config, &window, &observations))
    }

    /// Persist a computed window. Rejected if the week already has one.
    pub fn save_window(&self, window: &PrescribedWindow) -> Result<PrescribedWindow, EngineError> {
        let stored = self.store.create_window(window.clone())?;
        info!(
            user_id = %stored.user_id,
            week_start = %stored.week_start_date,
            decision = stored.decision.as_str(),
            time_in_bed = stored.time_in_bed_minutes,
            "prescribed window created"
        );
        Ok(stored)
    }

    pub(crate) fn baseline_for_week(
        &self,
        user_id: UserId,
        as_of: NaiveDate,
        week_start: NaiveDate,
    ) -> Result<Assessment<WindowDecision>, EngineError> {
        let state = self.store.load_user(user_id)?;
        let (from, to) = trailing_range(as_of, self.config.window_days);
        let observations = self.store.find_observations(user_id, from, to)?;
        let assessment = assess_baseline(
            &self.config,
            &state,
            &observations,
            week_start,
            Utc::now(),
        )?;
        self.flag_if_needed(&assessment);
        Ok(assessment)
    }

    fn flag_if_needed(&self, assessment: &Assessment<WindowDecision>) {
        let Assessment::Ready(decision) = assessment else {
            return;
        };
        if !decision.flagged {
            return;
        }
        let window = &decision.window;
        let efficiency = window.avg_sleep_efficiency_percent.unwrap_or_default();
        let reason = match window.decision {
            DecisionKind::Baseline => baseline_reason(efficiency),
            _ => weekly_reason(efficiency),
        };
        SafetyMonitor::new(self.store).flag_best_effort(window.user_id, &reason);
    }
}

fn build_observation(user_id: UserId, id: Uuid, input: ObservationInput) -> Observation {
    let metrics = SleepMetrics::from_input(&input);
    Observation {
        id,
        user_id,
        date: input.date,
        bedtime: input.bedtime,
        final_wake_time: input.final_wake_time,
        out_of_bed_time: input.out_of_bed_time,
        sleep_onset_latency_minutes: input.sleep_onset_latency_minutes,
        wake_after_sleep_onset_minutes: input.wake_after_sleep_onset_minutes,
        subjective_quality: input.subjective_quality,
        source: input.source,
        metrics,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::{InMemoryStore, UserStateRepository, WindowRepository};
    use crate::types::ObservationSource;

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    /// Diary entry in bed at 23:00 for `time_in_bed` minutes with `awake` minutes awake
    pub(crate) fn entry(date: NaiveDate, time_in_bed: u32, awake: u32) -> ObservationInput {
        let bedtime = date.and_hms_opt(23, 0, 0).unwrap();
        let out = bedtime + Duration::minutes(i64::from(time_in_bed));
        ObservationInput {
            date,
            bedtime,
            final_wake_time: out,
            out_of_bed_time: out,
            sleep_onset_latency_minutes: awake / 2,
            wake_after_sleep_onset_minutes: awake - awake / 2,
            subjective_quality: 6,
            source: ObservationSource::Device,
        }
    }

    #[test]
    fn test_log_observation_starts_program_and_completes_baseline() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();

        for d in 8..12 {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
        }
        let state = store.load_user(user).unwrap();
        assert_eq!(state.program_start_date, Some(day(8)));
        assert!(!state.baseline_complete());

        let logged = engine.log_observation(user, entry(day(12), 480, 48)).unwrap();
        assert_eq!(logged.metrics.sleep_efficiency_percent, 90.0);
        assert!(store.load_user(user).unwrap().baseline_complete());
    }

    #[test]
    fn test_baseline_completes_when_logged_newest_first() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();
        engine.set_target_wake_time(user, "07:00".parse().unwrap()).unwrap();

        for (i, d) in (8..=14).rev().enumerate() {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
            // Fifth night logged is the first time a week holds five
            assert_eq!(store.load_user(user).unwrap().baseline_complete(), i >= 4);
        }

        let decision = engine.compute_baseline(user, day(14)).unwrap();
        assert!(decision.is_ready());
    }

    #[test]
    fn test_baseline_completes_in_shuffled_order() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();

        for d in [11, 8, 14, 9] {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
        }
        assert!(!store.load_user(user).unwrap().baseline_complete());

        engine.log_observation(user, entry(day(13), 480, 48)).unwrap();
        assert!(store.load_user(user).unwrap().baseline_complete());
    }

    #[test]
    fn test_sparse_nights_do_not_complete_baseline() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();

        // Every other night: no eight-day window holds more than four
        for d in [11, 1, 9, 3, 7, 5] {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
        }
        assert!(!store.load_user(user).unwrap().baseline_complete());
    }

    #[test]
    fn test_log_rejects_invalid_and_duplicate() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();

        let mut bad = entry(day(8), 480, 48);
        bad.subjective_quality = 11;
        assert!(matches!(
            engine.log_observation(user, bad),
            Err(EngineError::InvalidObservation(_))
        ));

        engine.log_observation(user, entry(day(8), 480, 48)).unwrap();
        assert!(matches!(
            engine.log_observation(user, entry(day(8), 450, 20)),
            Err(EngineError::DuplicateObservation(_))
        ));
    }

    #[test]
    fn test_correct_observation_recomputes_metrics() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();

        let original = engine.log_observation(user, entry(day(8), 480, 48)).unwrap();
        let corrected = engine.correct_observation(user, entry(day(8), 480, 96)).unwrap();
        assert_eq!(corrected.id, original.id);
        assert_eq!(corrected.metrics.sleep_efficiency_percent, 80.0);

        assert!(matches!(
            engine.correct_observation(user, entry(day(9), 480, 96)),
            Err(EngineError::ObservationNotFound(_))
        ));
    }

    #[test]
    fn test_baseline_requires_wake_time_first() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();
        assert!(matches!(
            engine.compute_baseline(user, day(14)),
            Err(EngineError::MissingTargetWakeTime)
        ));

        engine.set_target_wake_time(user, "07:00".parse().unwrap()).unwrap();
        assert!(matches!(
            engine.compute_baseline(user, day(14)),
            Err(EngineError::BaselineIncomplete)
        ));
    }

    #[test]
    fn test_establish_baseline_persists_and_flags() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();
        engine.set_target_wake_time(user, "07:00".parse().unwrap()).unwrap();
        // 50% efficiency every night
        for d in 8..=14 {
            engine.log_observation(user, entry(day(d), 480, 240)).unwrap();
        }

        let decision = engine
            .establish_baseline(user, day(14))
            .unwrap()
            .ready()
            .unwrap();
        // 240 asleep + 30
        assert_eq!(decision.window.time_in_bed_minutes, 300);
        assert_eq!(decision.window.week_start_date, day(8));
        assert!(decision.flagged);

        let state = store.load_user(user).unwrap();
        assert_eq!(state.flag_reason(), Some("Low baseline SE: 50%"));
        assert!(store.find_window(user, day(8)).unwrap().is_some());

        assert!(matches!(
            engine.establish_baseline(user, day(14)),
            Err(EngineError::DuplicateWindow(_))
        ));
    }

    #[test]
    fn test_weekly_adjustment_falls_back_to_baseline() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();
        engine.set_target_wake_time(user, "07:00".parse().unwrap()).unwrap();
        for d in 8..=14 {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
        }

        let decision = engine
            .compute_weekly_adjustment(user, day(14))
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(decision.window.decision, DecisionKind::Baseline);
        assert_eq!(decision.window.week_start_date, day(15));
    }

    #[test]
    fn test_adherence_none_without_window_or_nights() {
        let store = InMemoryStore::new();
        let engine = TitrationEngine::new(&store);
        let user = Uuid::new_v4();
        engine.log_observation(user, entry(day(8), 480, 48)).unwrap();
        assert_eq!(engine.compute_adherence(user, day(8), day(14)).unwrap(), None);

        engine.set_target_wake_time(user, "07:00".parse().unwrap()).unwrap();
        for d in 9..=12 {
            engine.log_observation(user, entry(day(d), 480, 48)).unwrap();
        }
        engine.establish_baseline(user, day(12)).unwrap();

        assert_eq!(engine.compute_adherence(user, day(8), day(14)).unwrap(), Some(100));
        assert_eq!(engine.compute_adherence(user, day(20), day(21)).unwrap(), None);
    }
}
