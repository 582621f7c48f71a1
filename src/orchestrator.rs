//! Weekly orchestration
//!
//! Drives every user through one titration cycle per calendar week. Users are
//! processed one at a time; a failure for one user is recorded in the report
//! and the batch moves on. Re-running a week is a no-op for users who already
//! have a window for it.

use crate::clock::week_after;
use crate::engine::TitrationEngine;
use crate::error::EngineError;
use crate::repository::ProgramStore;
use crate::types::{Assessment, PrescribedWindow, UserId};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

/// What happened to one user in a weekly run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Created {
        window: PrescribedWindow,
        flagged: bool,
    },
    AlreadyProcessed {
        week_start_date: NaiveDate,
    },
    InsufficientData {
        entries_needed: u32,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRunResult {
    pub user_id: UserId,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// Result of one weekly batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Monday of the week the new windows govern
    pub week_start_date: NaiveDate,
    pub results: Vec<UserRunResult>,
}

impl BatchReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Created { .. }))
    }

    pub fn already_processed(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::AlreadyProcessed { .. }))
    }

    pub fn insufficient(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::InsufficientData { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RunOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Sequential weekly batch driver
pub struct WeeklyOrchestrator<'a, S: ?Sized> {
    engine: TitrationEngine<'a, S>,
}

impl<'a, S: ProgramStore + ?Sized> WeeklyOrchestrator<'a, S> {
    pub fn new(engine: TitrationEngine<'a, S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TitrationEngine<'a, S> {
        &self.engine
    }

    /// Run the cycle for the week ending on `week_end` for every known user
    pub fn run_all(&self, week_end: NaiveDate) -> Result<BatchReport, EngineError> {
        let users = self.engine.store().list_users()?;
        Ok(self.run(&users, week_end))
    }

    /// Run the cycle for the week ending on `week_end` for `users`, in order
    pub fn run(&self, users: &[UserId], week_end: NaiveDate) -> BatchReport {
        let week_start_date = week_after(week_end);
        let delay = self.engine.config().inter_user_delay();
        info!(%week_start_date, users = users.len(), "weekly titration run started");

        let mut results = Vec::with_capacity(users.len());
        for (i, &user_id) in users.iter().enumerate() {
            if i > 0 {
                if let Some(delay) = delay {
                    std::thread::sleep(delay);
                }
            }
            let outcome = self.process_user(user_id, week_end);
            results.push(UserRunResult { user_id, outcome });
        }

        let report = BatchReport {
            week_start_date,
            results,
        };
        info!(
            %week_start_date,
            created = report.created(),
            already_processed = report.already_processed(),
            insufficient = report.insufficient(),
            failed = report.failed(),
            "weekly titration run finished"
        );
        report
    }

    /// One user's cycle. Never fails; errors become [`RunOutcome::Failed`].
    pub fn process_user(&self, user_id: UserId, week_end: NaiveDate) -> RunOutcome {
        let week_start_date = week_after(week_end);
        let outcome = self.try_process_user(user_id, week_end, week_start_date);
        match &outcome {
            RunOutcome::Failed { reason } => {
                warn!(%user_id, %week_start_date, reason = %reason, "weekly titration failed")
            }
            RunOutcome::InsufficientData { entries_needed } => {
                info!(%user_id, entries_needed, "not enough nights for weekly titration")
            }
            RunOutcome::AlreadyProcessed { .. } => {
                info!(%user_id, %week_start_date, "week already processed")
            }
            RunOutcome::Created { .. } => {}
        }
        outcome
    }

    fn try_process_user(
        &self,
        user_id: UserId,
        week_end: NaiveDate,
        week_start_date: NaiveDate,
    ) -> RunOutcome {
        match self.engine.store().find_window(user_id, week_start_date) {
            Ok(Some(_)) => return RunOutcome::AlreadyProcessed { week_start_date },
            Ok(None) => {}
            Err(error) => return failed(error),
        }

        let decision = match self.engine.compute_weekly_adjustment(user_id, week_end) {
            Ok(Assessment::Ready(decision)) => decision,
            Ok(Assessment::InsufficientData { entries_needed }) => {
                return RunOutcome::InsufficientData { entries_needed }
            }
            Err(error) => return failed(error),
        };

        match self.engine.save_window(&decision.window) {
            Ok(window) => RunOutcome::Created {
                window,
                flagged: decision.flagged,
            },
            // Lost a race with a concurrent run for the same week
            Err(EngineError::DuplicateWindow(_)) => {
                RunOutcome::AlreadyProcessed { week_start_date }
            }
            Err(error) => failed(error),
        }
    }
}

fn failed(error: EngineError) -> RunOutcome {
    RunOutcome::Failed {
        reason: error.to_string(),
    }
}
