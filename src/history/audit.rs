//! Audit-log projection of the ledger.
//!
//! One row per history entry, in ledger order. Ids and version labels come
//! from the entries themselves, so projecting the same ledger twice yields
//! identical rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ExecutionHistoryLedger;
use crate::pipeline::Outcome;

/// Stage label attached to every audit row.
pub const AUDIT_STAGE: &str = "reporting";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub id: u64,
    pub execution_id: String,
    pub version: String,
    pub stage: &'static str,
    pub status: Outcome,
    pub timestamp: DateTime<Utc>,
    pub location: String,
}

/// Project the ledger into audit rows.
pub fn audit_rows(ledger: &ExecutionHistoryLedger) -> Vec<AuditRow> {
    ledger
        .all()
        .map(|entry| AuditRow {
            id: entry.id,
            execution_id: entry.execution_id.clone(),
            version: entry.audit_version.clone(),
            stage: AUDIT_STAGE,
            status: entry.status,
            timestamp: entry.timestamp,
            location: entry.location.clone(),
        })
        .collect()
}
