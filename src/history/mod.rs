//! Execution history: the bounded ledger and the views derived from it.

pub mod audit;
pub mod ledger;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{Execution, Outcome, RetryCounts, StageName};

pub use self::audit::{audit_rows, AuditRow};
pub use self::ledger::{ExecutionHistoryLedger, LEDGER_CAPACITY};
pub use self::stats::{statistics, Statistics};

/// Placeholder for identifiers the executor never assigned.
pub const NOT_AVAILABLE: &str = "N/A";

/// Immutable summary of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Sequential id, assigned once when the entry is created.
    pub id: u64,
    /// Client-side identity of the run, absent on entries from older stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub location: String,
    pub country: String,
    pub started_at: DateTime<Utc>,
    /// When the execution reached its terminal outcome.
    pub timestamp: DateTime<Utc>,
    pub status: Outcome,
    pub execution_id: String,
    pub version: String,
    /// Version label shown in the audit view, fixed at creation.
    pub audit_version: String,
    pub retries: RetryCounts,
    pub validation_warnings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    /// Snapshot `execution` as a finished run with the given outcome.
    pub fn record(id: u64, execution: &Execution, status: Outcome, finished_at: DateTime<Utc>) -> Self {
        let (error, failed_stage) = match status {
            Outcome::Success => (None, None),
            Outcome::Error => (
                Some(
                    execution
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                ),
                execution.stages.failed_stage(),
            ),
        };

        Self {
            id,
            run_id: Some(execution.run_id),
            location: execution.location.city.clone(),
            country: execution.location.country.clone(),
            started_at: execution.started_at,
            timestamp: finished_at,
            status,
            execution_id: execution
                .execution_id
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            version: execution
                .version
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            audit_version: audit_version_label(finished_at),
            retries: execution.retries.counts(),
            validation_warnings: execution.warnings.len(),
            failed_stage,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Outcome::Success
    }

    pub fn total_retries(&self) -> u32 {
        self.retries.total()
    }
}

/// `v<date>_<millis>` label derived from the finish time.
pub fn audit_version_label(at: DateTime<Utc>) -> String {
    format!("v{}_{}", at.format("%Y-%m-%d"), at.timestamp_millis())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::TimeZone;

    /// A finished entry with a deterministic timestamp derived from `id`.
    pub fn entry(id: u64, status: Outcome) -> HistoryEntry {
        let at = Utc.with_ymd_and_hms(2025, 10, 25, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(id as i64);
        HistoryEntry {
            id,
            run_id: None,
            location: "London".to_string(),
            country: "uk".to_string(),
            started_at: at,
            timestamp: at,
            status,
            execution_id: match status {
                Outcome::Success => format!("exec-{id}"),
                Outcome::Error => NOT_AVAILABLE.to_string(),
            },
            version: "v1".to_string(),
            audit_version: audit_version_label(at),
            retries: RetryCounts::default(),
            validation_warnings: 0,
            failed_stage: None,
            error: None,
        }
    }
}
