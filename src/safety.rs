//! Safety monitor
//!
//! Flags a user for clinician review when average sleep efficiency falls
//! below the safety floor. Flagging is independent of the titration decision
//! and never clears itself.

use crate::error::EngineError;
use crate::repository::UserStateRepository;
use crate::types::{UserId, UserProgramState};
use chrono::Utc;
use tracing::{info, warn};

/// Reason recorded when a baseline average is below the floor
pub fn baseline_reason(avg_efficiency_percent: f64) -> String {
    format!("Low baseline SE: {}%", one_decimal(avg_efficiency_percent))
}

/// Reason recorded when a weekly average is below the floor
pub fn weekly_reason(avg_efficiency_percent: f64) -> String {
    format!("Persistent low SE: {}%", one_decimal(avg_efficiency_percent))
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Writes review flags through the user-state repository
pub struct SafetyMonitor<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: UserStateRepository + ?Sized> SafetyMonitor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Set the review flag, overwriting the reason if already flagged
    pub fn flag_for_review(
        &self,
        user_id: UserId,
        reason: &str,
    ) -> Result<UserProgramState, EngineError> {
        let now = Utc::now();
        let state = self
            .store
            .update_user(user_id, &mut |state: &mut UserProgramState| {
                state.flag(reason, now)
            })?;
        info!(%user_id, reason, "user flagged for review");
        Ok(state)
    }

    /// Flag without failing the caller. Returns whether the write succeeded.
    pub fn flag_best_effort(&self, user_id: UserId, reason: &str) -> bool {
        match self.flag_for_review(user_id, reason) {
            Ok(_) => true,
            Err(error) => {
                warn!(%user_id, %error, reason, "failed to record review flag");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use uuid::Uuid;

    #[test]
    fn test_reason_formatting() {
        assert_eq!(weekly_reason(65.0), "Persistent low SE: 65%");
        assert_eq!(weekly_reason(64.28571), "Persistent low SE: 64.3%");
        assert_eq!(baseline_reason(50.0), "Low baseline SE: 50%");
    }

    #[test]
    fn test_flag_is_idempotent_and_overwrites_reason() {
        let store = InMemoryStore::new();
        let monitor = SafetyMonitor::new(&store);
        let user = Uuid::new_v4();

        monitor.flag_for_review(user, "Low baseline SE: 60%").unwrap();
        let state = monitor.flag_for_review(user, "Persistent low SE: 65%").unwrap();

        assert!(state.is_flagged());
        assert_eq!(state.flag_reason(), Some("Persistent low SE: 65%"));
        assert!(store.load_user(user).unwrap().is_flagged());
    }

    struct FailingStore;

    impl UserStateRepository for FailingStore {
        fn load_user(&self, _user_id: UserId) -> Result<UserProgramState, EngineError> {
            Err(EngineError::Storage("offline".to_string()))
        }

        fn update_user(
            &self,
            _user_id: UserId,
            _change: &mut dyn FnMut(&mut UserProgramState),
        ) -> Result<UserProgramState, EngineError> {
            Err(EngineError::Storage("offline".to_string()))
        }

        fn list_users(&self) -> Result<Vec<UserId>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        let monitor = SafetyMonitor::new(&FailingStore);
        assert!(!monitor.flag_best_effort(Uuid::new_v4(), "Persistent low SE: 65%"));
    }
}
