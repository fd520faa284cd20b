//! Aggregate statistics over the ledger.

use serde::Serialize;

use super::{ExecutionHistoryLedger, HistoryEntry};
use crate::pipeline::Outcome;

/// Derived counts. Never stored; recomputed from the ledger on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl Statistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Self {
        entries
            .into_iter()
            .fold(Statistics::default(), |mut acc, entry| {
                acc.total += 1;
                match entry.status {
                    Outcome::Success => acc.successful += 1,
                    Outcome::Error => acc.failed += 1,
                }
                acc
            })
    }

    /// Fraction of successful runs in `0.0..=1.0`; zero for an empty ledger.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64
    }
}

/// `{total, successful, failed}` for the current ledger contents.
pub fn statistics(ledger: &ExecutionHistoryLedger) -> Statistics {
    Statistics::from_entries(ledger.all())
}
