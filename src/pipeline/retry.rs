//! Retry counts per upstream data source.
//!
//! These are retries already absorbed by the executor while it fetched data;
//! this crate never retries anything itself.

use serde::{Deserialize, Serialize};

/// Upstream sources the collector stage reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Weather,
    Bitcoin,
}

/// Retry counts for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounts {
    #[serde(default)]
    pub weather: u32,
    #[serde(default)]
    pub bitcoin: u32,
}

impl RetryCounts {
    /// Combined retries, saturating at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.weather.saturating_add(self.bitcoin)
    }
}

/// Holds the retry counts of the current execution.
#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    counts: RetryCounts,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.counts = RetryCounts::default();
    }

    pub fn record(&mut self, source: DataSource, retries: u32) {
        match source {
            DataSource::Weather => self.counts.weather = retries,
            DataSource::Bitcoin => self.counts.bitcoin = retries,
        }
    }

    /// Replace both counts at once, as reported by the executor.
    pub fn record_all(&mut self, counts: RetryCounts) {
        self.counts = counts;
    }

    pub fn get(&self, source: DataSource) -> u32 {
        match source {
            DataSource::Weather => self.counts.weather,
            DataSource::Bitcoin => self.counts.bitcoin,
        }
    }

    pub fn counts(&self) -> RetryCounts {
        self.counts
    }
}
