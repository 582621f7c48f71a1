//! Synheart Titration - sleep-restriction titration engine
//!
//! Converts a rolling window of nightly sleep observations into a prescribed,
//! bounded sleep window, updates it once per calendar week from average sleep
//! efficiency, tracks adherence to the prescription, and flags persistently
//! poor outcomes for clinician review.
//!
//! ## Modules
//!
//! - **Calculators**: [`metrics`], [`baseline`], [`titration`], [`adherence`], [`safety`]
//! - **Drivers**: [`engine::TitrationEngine`] for per-user actions and
//!   [`orchestrator::WeeklyOrchestrator`] for the weekly batch
//! - **Storage**: [`repository`] traits with an in-memory JSON-snapshot store

pub mod adherence;
pub mod baseline;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod safety;
pub mod titration;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{calculate_bedtime, derive_bedtime, TimeOfDay};
pub use config::TitrationConfig;
pub use engine::TitrationEngine;
pub use error::{EngineError, ErrorKind};
pub use metrics::compute_sleep_metrics;
pub use orchestrator::{BatchReport, RunOutcome, WeeklyOrchestrator};
pub use repository::{
    InMemoryStore, ObservationRepository, ProgramStore, UserStateRepository, WindowRepository,
};
pub use titration::{titrate, TitrationStep};
pub use types::{
    Assessment, DecisionKind, DecisionSummary, Observation, ObservationInput, ObservationSource,
    PrescribedWindow, ReviewFlag, SleepMetrics, UserId, UserProgramState, WindowDecision,
};

/// Engine version
pub const TITRATION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-titration";
