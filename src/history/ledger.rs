//! Bounded, most-recent-first ledger of finished executions.

use std::collections::VecDeque;

use super::HistoryEntry;

/// Maximum number of entries the ledger retains.
pub const LEDGER_CAPACITY: usize = 20;

/// Append-only (from the head) store of the most recent history entries.
///
/// Entries are never mutated after insertion and are only ever removed by
/// evicting the oldest one when the bound is exceeded. Appending the same
/// entry twice keeps both copies.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistoryLedger {
    entries: VecDeque<HistoryEntry>,
}

impl ExecutionHistoryLedger {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(LEDGER_CAPACITY + 1),
        }
    }

    /// Rebuild a ledger from entries given most-recent-first. Anything past
    /// the bound is dropped.
    pub fn from_recent(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut ledger = Self::new();
        ledger
            .entries
            .extend(entries.into_iter().take(LEDGER_CAPACITY));
        ledger
    }

    /// Insert at the head. Returns the evicted tail entry, if any.
    pub fn append(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.entries.push_front(entry);
        if self.entries.len() > LEDGER_CAPACITY {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// All entries, most recent first.
    pub fn all(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn head(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest entry id present, used to continue the id sequence.
    pub fn max_id(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.id).max()
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
