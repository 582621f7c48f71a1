//! Persistence boundaries
//!
//! The engine talks to storage only through these traits. [`InMemoryStore`]
//! implements all three with one slot per key, so a second observation for the
//! same night or a second window for the same week is rejected by the store
//! itself rather than by a check-then-act in the caller.

use crate::error::EngineError;
use crate::types::{Observation, PrescribedWindow, UserId, UserProgramState};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Nightly observations, unique per `(user, date)`
pub trait ObservationRepository {
    /// Observations with `from <= date <= to`, oldest first
    fn find_observations(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Observation>, EngineError>;

    fn count_observations(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<usize, EngineError> {
        Ok(self.find_observations(user_id, from, to)?.len())
    }

    /// Fails with `DuplicateObservation` if the night is already recorded
    fn create_observation(&self, observation: Observation) -> Result<Observation, EngineError>;

    /// Fails with `ObservationNotFound` if there is nothing to correct
    fn replace_observation(&self, observation: Observation) -> Result<Observation, EngineError>;
}

/// Prescribed windows, unique per `(user, week_start_date)`
pub trait WindowRepository {
    fn find_latest_window(&self, user_id: UserId) -> Result<Option<PrescribedWindow>, EngineError>;

    fn find_window(
        &self,
        user_id: UserId,
        week_start_date: NaiveDate,
    ) -> Result<Option<PrescribedWindow>, EngineError>;

    /// Latest window whose week starts on or before `date`
    fn find_window_on_or_before(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<PrescribedWindow>, EngineError>;

    /// Fails with `DuplicateWindow` if the week already has a window
    fn create_window(&self, window: PrescribedWindow) -> Result<PrescribedWindow, EngineError>;
}

/// Per-user program state
pub trait UserStateRepository {
    /// Current state, or a fresh one for an unknown user
    fn load_user(&self, user_id: UserId) -> Result<UserProgramState, EngineError>;

    /// Apply `change` atomically and return the stored result
    fn update_user(
        &self,
        user_id: UserId,
        change: &mut dyn FnMut(&mut UserProgramState),
    ) -> Result<UserProgramState, EngineError>;

    fn list_users(&self) -> Result<Vec<UserId>, EngineError>;
}

/// Everything the engine needs from storage
pub trait ProgramStore: ObservationRepository + WindowRepository + UserStateRepository {}

impl<T> ProgramStore for T where
    T: ObservationRepository + WindowRepository + UserStateRepository
{
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    users: BTreeMap<UserId, UserProgramState>,
    #[serde(default)]
    observations: BTreeMap<UserId, BTreeMap<NaiveDate, Observation>>,
    #[serde(default)]
    windows: BTreeMap<UserId, BTreeMap<NaiveDate, PrescribedWindow>>,
}

/// Thread-safe in-memory store, persistable as a JSON snapshot
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreSnapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        Ok(Self {
            inner: Mutex::new(snapshot),
        })
    }

    /// Serialize the store to a JSON snapshot
    pub fn to_json(&self) -> Result<String, EngineError> {
        let snapshot = self.lock()?;
        Ok(serde_json::to_string_pretty(&*snapshot)?)
    }

    /// All windows for a user, oldest week first
    pub fn windows_for(&self, user_id: UserId) -> Result<Vec<PrescribedWindow>, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .windows
            .get(&user_id)
            .map(|weeks| weeks.values().cloned().collect())
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Storage("store mutex poisoned".to_string()))
    }
}

impl ObservationRepository for InMemoryStore {
    fn find_observations(
        &self,
        user_id: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Observation>, EngineError> {
        if from > to {
            return Ok(Vec::new());
        }
        let snapshot = self.lock()?;
        Ok(snapshot
            .observations
            .get(&user_id)
            .map(|nights| nights.range(from..=to).map(|(_, o)| o.clone()).collect())
            .unwrap_or_default())
    }

    fn create_observation(&self, observation: Observation) -> Result<Observation, EngineError> {
        let mut snapshot = self.lock()?;
        let nights = snapshot.observations.entry(observation.user_id).or_default();
        match nights.entry(observation.date) {
            Entry::Occupied(_) => Err(EngineError::DuplicateObservation(
                observation.date.to_string(),
            )),
            Entry::Vacant(slot) => Ok(slot.insert(observation).clone()),
        }
    }

    fn replace_observation(&self, observation: Observation) -> Result<Observation, EngineError> {
        let mut snapshot = self.lock()?;
        let slot = snapshot
            .observations
            .get_mut(&observation.user_id)
            .and_then(|nights| nights.get_mut(&observation.date))
            .ok_or_else(|| EngineError::ObservationNotFound(observation.date.to_string()))?;
        *slot = observation.clone();
        Ok(observation)
    }
}

impl WindowRepository for InMemoryStore {
    fn find_latest_window(&self, user_id: UserId) -> Result<Option<PrescribedWindow>, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .windows
            .get(&user_id)
            .and_then(|weeks| weeks.values().next_back().cloned()))
    }

    fn find_window(
        &self,
        user_id: UserId,
        week_start_date: NaiveDate,
    ) -> Result<Option<PrescribedWindow>, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .windows
            .get(&user_id)
            .and_then(|weeks| weeks.get(&week_start_date).cloned()))
    }

    fn find_window_on_or_before(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<PrescribedWindow>, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .windows
            .get(&user_id)
            .and_then(|weeks| weeks.range(..=date).next_back().map(|(_, w)| w.clone())))
    }

    fn create_window(&self, window: PrescribedWindow) -> Result<PrescribedWindow, EngineError> {
        let mut snapshot = self.lock()?;
        let weeks = snapshot.windows.entry(window.user_id).or_default();
        match weeks.entry(window.week_start_date) {
            Entry::Occupied(_) => Err(EngineError::DuplicateWindow(
                window.week_start_date.to_string(),
            )),
            Entry::Vacant(slot) => Ok(slot.insert(window).clone()),
        }
    }
}

impl UserStateRepository for InMemoryStore {
    fn load_user(&self, user_id: UserId) -> Result<UserProgramState, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot
            .users
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserProgramState::new(user_id)))
    }

    fn update_user(
        &self,
        user_id: UserId,
        change: &mut dyn FnMut(&mut UserProgramState),
    ) -> Result<UserProgramState, EngineError> {
        let mut snapshot = self.lock()?;
        let state = snapshot
            .users
            .entry(user_id)
            .or_insert_with(|| UserProgramState::new(user_id));
        change(state);
        Ok(state.clone())
    }

    fn list_users(&self) -> Result<Vec<UserId>, EngineError> {
        let snapshot = self.lock()?;
        Ok(snapshot.users.keys().copied().collect())
    }
}
