//! Client-side model of one pipeline execution.
//!
//! An [`Execution`] bundles the stage state machine, the retry tracker and
//! the validation warnings for the run currently in flight. It is created
//! when a run is triggered and discarded once it has been turned into a
//! history entry.

pub mod retry;
pub mod stage;
pub mod warnings;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::location::Location;

pub use self::retry::{DataSource, RetryCounts, RetryTracker};
pub use self::stage::{StageName, StageStateMachine, StageStatus, TransitionError};
pub use self::warnings::{ValidationReport, ValidationWarningSet};

/// Terminal outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// The run currently in flight (or just finished).
#[derive(Debug, Clone)]
pub struct Execution {
    /// Local identity of this run; scheduled stage advances are keyed to it.
    pub run_id: Uuid,
    pub location: Location,
    pub started_at: DateTime<Utc>,
    /// Assigned by the executor once it acknowledges the trigger.
    pub execution_id: Option<String>,
    pub version: Option<String>,
    pub collected_items: Option<u64>,
    pub stages: StageStateMachine,
    pub retries: RetryTracker,
    pub warnings: ValidationWarningSet,
    pub outcome: Option<Outcome>,
    pub error_message: Option<String>,
}

impl Execution {
    /// Start a fresh execution with every stage `Pending`.
    pub fn new(location: Location, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            location,
            started_at,
            execution_id: None,
            version: None,
            collected_items: None,
            stages: StageStateMachine::new(),
            retries: RetryTracker::new(),
            warnings: ValidationWarningSet::new(),
            outcome: None,
            error_message: None,
        }
    }

    /// Whether the executor has acknowledged this run.
    pub fn is_acknowledged(&self) -> bool {
        self.execution_id.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn view(&self) -> ExecutionView {
        ExecutionView {
            run_id: self.run_id,
            location: self.location.city.clone(),
            country: self.location.country.clone(),
            started_at: self.started_at,
            execution_id: self.execution_id.clone(),
            version: self.version.clone(),
            collected_items: self.collected_items,
            stages: self.stages.as_map(),
            retries: self.retries.counts(),
            validation_warnings: self.warnings.as_slice().to_vec(),
            outcome: self.outcome,
            error_message: self.error_message.clone(),
        }
    }
}

/// Read-only, serializable projection of an [`Execution`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionView {
    pub run_id: Uuid,
    pub location: String,
    pub country: String,
    pub started_at: DateTime<Utc>,
    pub execution_id: Option<String>,
    pub version: Option<String>,
    pub collected_items: Option<u64>,
    pub stages: BTreeMap<StageName, StageStatus>,
    pub retries: RetryCounts,
    pub validation_warnings: Vec<String>,
    pub outcome: Option<Outcome>,
    pub error_message: Option<String>,
}
