//! Scheduled stage advances after the executor acknowledges a run.
//!
//! The remote pipeline reports nothing between acknowledgement and
//! completion, so progress is displayed on a fixed cadence. Step `k` marks
//! stage `k` successful and the next one loading; the last step completes the
//! run. Each step is tied to the run that scheduled it and does nothing once
//! that run is no longer in flight.

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::Inner;
use crate::events::PipelineEvent;
use crate::pipeline::{Outcome, StageName, StageStatus, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    /// More advances remain.
    Continue,
    /// The run completed and was recorded.
    Finished,
    /// The run this step belongs to is gone.
    Stale,
}

impl Inner {
    pub(super) async fn drive_timeline(&self, run_id: Uuid, cancel: CancellationToken) {
        let start = Instant::now();
        for (index, offset) in self.timeline.offsets().into_iter().enumerate() {
            let Some(stage) = StageName::from_index(index) else {
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%run_id, %stage, "timeline cancelled");
                    return;
                }
                _ = sleep_until(start + offset) => {}
            }

            match self.advance_step(run_id, stage).await {
                Ok(Step::Continue) => {}
                Ok(Step::Finished) => return,
                Ok(Step::Stale) => {
                    debug!(%run_id, %stage, "ignoring advance for stale run");
                    return;
                }
                Err(defect) => {
                    self.abort(run_id, defect).await;
                    return;
                }
            }
        }
    }

    async fn advance_step(&self, run_id: Uuid, stage: StageName) -> Result<Step, TransitionError> {
        let entry = {
            let mut state = self.state.write().await;
            if !state.owns(run_id) {
                return Ok(Step::Stale);
            }
            let report = state.in_flight.as_ref().and_then(|f| f.report.clone());
            let Some(exec) = state.current.as_mut() else {
                return Ok(Step::Stale);
            };

            if stage == StageName::Validator {
                if let Some(report) = report {
                    if exec.warnings.surface(&report) > 0 {
                        self.events.emit(PipelineEvent::WarningsRaised {
                            run_id,
                            warnings: exec.warnings.as_slice().to_vec(),
                        });
                    }
                }
            }

            if exec.stages.advance(stage, StageStatus::Success)? {
                self.events.emit(PipelineEvent::StageChanged {
                    run_id,
                    stage,
                    status: StageStatus::Success,
                });
            }

            if let Some(next) = stage.next() {
                if exec.stages.advance(next, StageStatus::Loading)? {
                    self.events.emit(PipelineEvent::StageChanged {
                        run_id,
                        stage: next,
                        status: StageStatus::Loading,
                    });
                }
                return Ok(Step::Continue);
            }

            let entry = self.record(&mut state, Outcome::Success);
            self.clear_in_flight(&mut state);
            entry
        };

        self.persist(entry).await;
        self.settle(run_id);
        Ok(Step::Finished)
    }
}
