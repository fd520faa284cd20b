//! Advisory warnings raised by the validator stage.
//!
//! Warnings never change an execution's outcome.

use serde::{Deserialize, Serialize};

/// Raised when the collected temperature is outside the expected band.
pub const TEMPERATURE_OUT_OF_RANGE: &str = "Temperature out of normal range";
/// Raised when the collected exchange rate moved more than expected.
pub const RATE_FLUCTUATION: &str = "Bitcoin rate fluctuation detected";

/// Validation findings reported by the executor for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Warnings to show verbatim.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Set when validation flagged the run without naming specific warnings.
    #[serde(default)]
    pub issue: bool,
}

/// Ordered, duplicate-free set of warnings for the current execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationWarningSet {
    warnings: Vec<String>,
}

impl ValidationWarningSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.warnings.clear();
    }

    /// Add a warning unless it is already present. Returns whether it was added.
    pub fn add(&mut self, warning: impl Into<String>) -> bool {
        let warning = warning.into();
        if self.warnings.contains(&warning) {
            return false;
        }
        self.warnings.push(warning);
        true
    }

    /// Apply a validation report.
    ///
    /// Explicit warnings are taken verbatim. A bare `issue` flag with no
    /// explicit warnings raises both canonical warnings together.
    pub fn surface(&mut self, report: &ValidationReport) -> usize {
        let before = self.warnings.len();
        if report.warnings.is_empty() {
            if report.issue {
                self.add(TEMPERATURE_OUT_OF_RANGE);
                self.add(RATE_FLUCTUATION);
            }
        } else {
            for w in &report.warnings {
                self.add(w.as_str());
            }
        }
        self.warnings.len() - before
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_flag_adds_both_canonical_warnings() {
        let mut set = ValidationWarningSet::new();
        let report = ValidationReport { warnings: Vec::new(), issue: true };
        assert_eq!(set.surface(&report), 2);
        assert_eq!(
            set.as_slice(),
            &[TEMPERATURE_OUT_OF_RANGE.to_string(), RATE_FLUCTUATION.to_string()]
        );
    }

    #[test]
    fn test_no_issue_adds_nothing() {
        let mut set = ValidationWarningSet::new();
        assert_eq!(set.surface(&ValidationReport::default()), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_explicit_warnings_are_deduplicated_in_order() {
        let mut set = ValidationWarningSet::new();
        let report = ValidationReport {
            warnings: vec![
                "humidity sensor stale".to_string(),
                RATE_FLUCTUATION.to_string(),
                "humidity sensor stale".to_string(),
            ],
            issue: true,
        };
        assert_eq!(set.surface(&report), 2);
        assert_eq!(set.as_slice()[0], "humidity sensor stale");
        assert_eq!(set.as_slice()[1], RATE_FLUCTUATION);
    }
}
