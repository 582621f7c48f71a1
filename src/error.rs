//! Error types for the titration engine

use thiserror::Error;

/// Broad class of an [`EngineError`], used by batch callers to branch on outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream state must be fixed before retrying (wake time, baseline phase)
    Precondition,
    /// Caller supplied malformed input
    Validation,
    /// Persistence layer rejected or failed the operation
    Storage,
    /// Should not happen given valid preconditions
    Computation,
}

/// Errors that can occur while computing or persisting a prescription
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no target wake time")]
    MissingTargetWakeTime,

    #[error("baseline not complete")]
    BaselineIncomplete,

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Observation already exists for {0}")]
    DuplicateObservation(String),

    #[error("No observation to correct for {0}")]
    ObservationNotFound(String),

    #[error("Window already exists for week starting {0}")]
    DuplicateWindow(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EngineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingTargetWakeTime | EngineError::BaselineIncomplete => {
                ErrorKind::Precondition
            }
            EngineError::InvalidTime(_)
            | EngineError::InvalidObservation(_)
            | EngineError::InvalidConfig(_)
            | EngineError::JsonError(_) => ErrorKind::Validation,
            EngineError::DuplicateObservation(_)
            | EngineError::ObservationNotFound(_)
            | EngineError::DuplicateWindow(_)
            | EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Computation(_) => ErrorKind::Computation,
        }
    }
}
