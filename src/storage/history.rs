//! Persisted snapshot of the history ledger.
//!
//! The in-memory ledger stays authoritative; the table mirrors it so a
//! restarted process can rehydrate the most recent entries.

use anyhow::{Context, Result};
use rusqlite::params;

use super::Pool;
use crate::history::{HistoryEntry, LEDGER_CAPACITY};

#[derive(Clone)]
pub struct HistoryStore {
    pool: Pool,
}

impl HistoryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Append `entry` and prune the table back to the ledger bound.
    pub fn save(&self, entry: &HistoryEntry) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let entry_json = serde_json::to_string(entry)?;
        tx.execute(
            "INSERT INTO history_entries (entry_id, status, execution_id, location, entry_json, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id as i64,
                entry.status.as_str(),
                entry.execution_id,
                entry.location,
                entry_json,
                entry.timestamp.to_rfc3339(),
            ],
        )
        .context("Failed to insert history entry")?;

        tx.execute(
            "DELETE FROM history_entries WHERE seq NOT IN (
                SELECT seq FROM history_entries ORDER BY seq DESC LIMIT ?1
             )",
            params![LEDGER_CAPACITY as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Up to `limit` entries, most recent first.
    pub fn load_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT seq, entry_json FROM history_entries ORDER BY seq DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for r in rows {
            let (seq, json) = r?;
            match serde_json::from_str::<HistoryEntry>(&json) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::error!(seq, error = %e, "Skipping unreadable history row"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::testing::entry;
    use crate::pipeline::Outcome;
    use crate::storage::open_pool;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("nested/history.db")).unwrap();
        (dir, HistoryStore::new(pool))
    }

    #[test]
    fn test_save_and_load_most_recent_first() {
        let (_dir, store) = store();
        store.save(&entry(1, Outcome::Success)).unwrap();
        store.save(&entry(2, Outcome::Error)).unwrap();

        let loaded = store.load_recent(LEDGER_CAPACITY).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], entry(2, Outcome::Error));
        assert_eq!(loaded[1].id, 1);
    }

    #[test]
    fn test_table_is_pruned_to_ledger_bound() {
        let (_dir, store) = store();
        for id in 1..=25 {
            store.save(&entry(id, Outcome::Success)).unwrap();
        }
        let loaded = store.load_recent(100).unwrap();
        assert_eq!(loaded.len(), LEDGER_CAPACITY);
        assert_eq!(loaded.first().map(|e| e.id), Some(25));
        assert_eq!(loaded.last().map(|e| e.id), Some(6));
    }

    #[test]
    fn test_duplicate_entries_are_kept() {
        let (_dir, store) = store();
        let e = entry(9, Outcome::Success);
        store.save(&e).unwrap();
        store.save(&e).unwrap();
        assert_eq!(store.load_recent(10).unwrap().len(), 2);
    }
}
