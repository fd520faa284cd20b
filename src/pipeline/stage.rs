//! Per-execution stage state machine.
//!
//! The four stages run in a fixed order. Once progression starts, statuses
//! along that order only ever move forward: a stage cannot start before every
//! earlier stage has succeeded, and a finished stage never changes again.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Collector,
    Validator,
    Processor,
    Reporter,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 4] = [
        StageName::Collector,
        StageName::Validator,
        StageName::Processor,
        StageName::Reporter,
    ];

    /// Position of this stage in the sequence (0..=3).
    pub fn index(self) -> usize {
        match self {
            StageName::Collector => 0,
            StageName::Validator => 1,
            StageName::Processor => 2,
            StageName::Reporter => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<StageName> {
        Self::ALL.get(index).copied()
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<StageName> {
        Self::from_index(self.index() + 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Collector => "collector",
            StageName::Validator => "validator",
            StageName::Processor => "processor",
            StageName::Reporter => "reporter",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Loading,
    Success,
    Error,
}

impl StageStatus {
    /// Ordering used by the monotonicity check. `Success` and `Error` share
    /// the top rank: both are final.
    fn rank(self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Loading => 1,
            StageStatus::Success | StageStatus::Error => 2,
        }
    }

    /// True for `Success` and `Error`.
    pub fn is_finished(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Loading => "loading",
            StageStatus::Success => "success",
            StageStatus::Error => "error",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// A rejected stage transition. Always a sequencing defect, never user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("stage {stage} cannot move from {from} back to {to}")]
    Backward {
        stage: StageName,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("stage {stage} cannot become {to} while {blocking} is {blocking_status}")]
    OutOfOrder {
        stage: StageName,
        to: StageStatus,
        blocking: StageName,
        blocking_status: StageStatus,
    },

    #[error("execution is terminal, stage {stage} cannot change")]
    Terminal { stage: StageName },
}

// ---------------------------------------------------------------------------
// StageStateMachine
// ---------------------------------------------------------------------------

/// Tracks the status of each of the four stages for the current execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStateMachine {
    statuses: [StageStatus; 4],
}

impl StageStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set every stage back to `Pending`.
    pub fn reset(&mut self) {
        self.statuses = [StageStatus::Pending; 4];
    }

    pub fn status(&self, stage: StageName) -> StageStatus {
        self.statuses[stage.index()]
    }

    /// Set `stage` to `status`.
    ///
    /// Setting a stage to the status it already has is accepted and changes
    /// nothing. Returns whether the status actually changed.
    pub fn advance(&mut self, stage: StageName, status: StageStatus) -> Result<bool, TransitionError> {
        let current = self.status(stage);
        if current == status {
            return Ok(false);
        }
        if self.is_terminal() {
            return Err(TransitionError::Terminal { stage });
        }
        if current.is_finished() || status.rank() < current.rank() {
            return Err(TransitionError::Backward {
                stage,
                from: current,
                to: status,
            });
        }
        self.check_predecessors(stage, status)?;

        self.statuses[stage.index()] = status;
        Ok(true)
    }

    /// Mark `stage` as failed. Later stages stay `Pending` for good because the
    /// execution becomes terminal.
    pub fn mark_failed(&mut self, stage: StageName) -> Result<(), TransitionError> {
        self.advance(stage, StageStatus::Error).map(|_| ())
    }

    /// True when all four stages succeeded or any stage failed.
    pub fn is_terminal(&self) -> bool {
        self.statuses.contains(&StageStatus::Error)
            || self.statuses.iter().all(|s| *s == StageStatus::Success)
    }

    /// True when every stage is `Success`.
    pub fn is_complete(&self) -> bool {
        self.statuses.iter().all(|s| *s == StageStatus::Success)
    }

    /// The stage currently `Loading`, if any.
    pub fn loading_stage(&self) -> Option<StageName> {
        StageName::ALL
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::Loading)
    }

    /// The stage that failed, if any.
    pub fn failed_stage(&self) -> Option<StageName> {
        StageName::ALL
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::Error)
    }

    /// The stage a failure should be attributed to right now: whichever is
    /// `Loading`, else `Collector`.
    pub fn failure_target(&self) -> StageName {
        self.loading_stage().unwrap_or(StageName::Collector)
    }

    /// Stage statuses keyed by name, in stage order.
    pub fn as_map(&self) -> BTreeMap<StageName, StageStatus> {
        StageName::ALL
            .into_iter()
            .map(|s| (s, self.status(s)))
            .collect()
    }

    fn check_predecessors(&self, stage: StageName, to: StageStatus) -> Result<(), TransitionError> {
        for earlier in &StageName::ALL[..stage.index()] {
            let earlier_status = self.status(*earlier);
            if earlier_status != StageStatus::Success {
                return Err(TransitionError::OutOfOrder {
                    stage,
                    to,
                    blocking: *earlier,
                    blocking_status: earlier_status,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run_through_success(m: &mut StageStateMachine) {
        for stage in StageName::ALL {
            m.advance(stage, StageStatus::Loading).unwrap();
            m.advance(stage, StageStatus::Success).unwrap();
        }
    }

    #[test]
    fn test_new_machine_is_all_pending() {
        let m = StageStateMachine::new();
        assert!(StageName::ALL
            .iter()
            .all(|s| m.status(*s) == StageStatus::Pending));
        assert!(!m.is_terminal());
        assert_eq!(m.loading_stage(), None);
    }

    #[test]
    fn test_full_progression_is_terminal() {
        let mut m = StageStateMachine::new();
        run_through_success(&mut m);
        assert!(m.is_terminal());
        assert!(m.is_complete());
        assert_eq!(m.failed_stage(), None);
    }

    #[test]
    fn test_cannot_skip_ahead_of_pending_stage() {
        let mut m = StageStateMachine::new();
        let err = m
            .advance(StageName::Processor, StageStatus::Loading)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::OutOfOrder {
                stage: StageName::Processor,
                to: StageStatus::Loading,
                blocking: StageName::Collector,
                blocking_status: StageStatus::Pending,
            }
        );
        assert_eq!(m.status(StageName::Processor), StageStatus::Pending);
    }

    #[test]
    fn test_cannot_start_while_previous_is_loading() {
        let mut m = StageStateMachine::new();
        m.advance(StageName::Collector, StageStatus::Loading).unwrap();
        assert!(matches!(
            m.advance(StageName::Validator, StageStatus::Loading),
            Err(TransitionError::OutOfOrder { blocking: StageName::Collector, .. })
        ));
    }

    #[test]
    fn test_success_cannot_revert() {
        let mut m = StageStateMachine::new();
        m.advance(StageName::Collector, StageStatus::Loading).unwrap();
        m.advance(StageName::Collector, StageStatus::Success).unwrap();
        assert!(matches!(
            m.advance(StageName::Collector, StageStatus::Loading),
            Err(TransitionError::Backward { .. })
        ));
        assert!(matches!(
            m.advance(StageName::Collector, StageStatus::Error),
            Err(TransitionError::Backward { .. })
        ));
    }

    #[test]
    fn test_same_status_is_a_no_op() {
        let mut m = StageStateMachine::new();
        assert_eq!(m.advance(StageName::Collector, StageStatus::Pending), Ok(false));
        assert_eq!(m.advance(StageName::Collector, StageStatus::Loading), Ok(true));
        assert_eq!(m.advance(StageName::Collector, StageStatus::Loading), Ok(false));
    }

    #[test]
    fn test_mark_failed_freezes_later_stages() {
        let mut m = StageStateMachine::new();
        m.advance(StageName::Collector, StageStatus::Loading).unwrap();
        m.advance(StageName::Collector, StageStatus::Success).unwrap();
        m.advance(StageName::Validator, StageStatus::Loading).unwrap();
        m.mark_failed(StageName::Validator).unwrap();

        assert!(m.is_terminal());
        assert_eq!(m.failed_stage(), Some(StageName::Validator));
        assert_eq!(m.status(StageName::Processor), StageStatus::Pending);
        assert_eq!(
            m.advance(StageName::Processor, StageStatus::Loading),
            Err(TransitionError::Terminal { stage: StageName::Processor })
        );
    }

    #[test]
    fn test_failure_target_defaults_to_collector() {
        let mut m = StageStateMachine::new();
        assert_eq!(m.failure_target(), StageName::Collector);
        m.advance(StageName::Collector, StageStatus::Loading).unwrap();
        m.advance(StageName::Collector, StageStatus::Success).unwrap();
        m.advance(StageName::Validator, StageStatus::Loading).unwrap();
        assert_eq!(m.failure_target(), StageName::Validator);
    }

    #[test]
    fn test_reset_clears_terminal_state() {
        let mut m = StageStateMachine::new();
        m.mark_failed(StageName::Collector).unwrap();
        m.reset();
        assert!(!m.is_terminal());
        assert_eq!(m.status(StageName::Collector), StageStatus::Pending);
    }

    #[test]
    fn test_map_serializes_lowercase_keys() {
        let mut m = StageStateMachine::new();
        m.advance(StageName::Collector, StageStatus::Loading).unwrap();
        let json = serde_json::to_value(m.as_map()).unwrap();
        assert_eq!(json["collector"], "loading");
        assert_eq!(json["reporter"], "pending");
    }

    fn arb_stage() -> impl Strategy<Value = StageName> {
        (0usize..4).prop_map(|i| StageName::ALL[i])
    }

    fn arb_status() -> impl Strategy<Value = StageStatus> {
        prop::sample::select(vec![
            StageStatus::Pending,
            StageStatus::Loading,
            StageStatus::Success,
            StageStatus::Error,
        ])
    }

    proptest! {
        #[test]
        fn prop_statuses_never_move_backward(
            ops in prop::collection::vec((arb_stage(), arb_status()), 0..64)
        ) {
            let mut m = StageStateMachine::new();
            for (stage, status) in ops {
                let before = m.clone();
                let result = m.advance(stage, status);

                for s in StageName::ALL {
                    let old = before.status(s);
                    let new = m.status(s);
                    if old.is_finished() {
                        prop_assert_eq!(old, new);
                    }
                    prop_assert!(new.rank() >= old.rank());
                }
                if result.is_err() {
                    prop_assert_eq!(&before, &m);
                }

                // Nothing past the first non-Success stage may have started.
                let first_open = StageName::ALL
                    .iter()
                    .position(|s| m.status(*s) != StageStatus::Success)
                    .unwrap_or(4);
                for s in StageName::ALL.iter().skip(first_open + 1) {
                    prop_assert_eq!(m.status(*s), StageStatus::Pending);
                }
            }
        }
    }
}
