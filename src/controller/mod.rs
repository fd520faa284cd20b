//! Orchestration of pipeline runs.
//!
//! [`TriggerController`] owns the current [`Execution`] and the history
//! ledger. A trigger resets the execution, calls the executor once, and on
//! acknowledgement hands the run to the stage timeline, which advances the
//! displayed stages on a fixed cadence and finally records the run in the
//! ledger. Only the controller mutates this state; everything else reads
//! snapshots or subscribes to [`PipelineEvent`]s.

mod timeline;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{OverlapPolicy, TimelineConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::executor::{PipelineExecutor, TriggerRequest, TriggerResponse};
use crate::history::{
    self, AuditRow, ExecutionHistoryLedger, HistoryEntry, Statistics, LEDGER_CAPACITY,
};
use crate::location::{Location, LocationError};
use crate::pipeline::{
    Execution, ExecutionView, Outcome, RetryCounts, StageName, StageStateMachine, StageStatus,
    TransitionError, ValidationReport,
};
use crate::storage::HistoryStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] LocationError),

    #[error("a run for {location} is already in flight")]
    AlreadyRunning { location: String },

    #[error("executor unreachable: {0}")]
    ExecutorUnreachable(String),

    #[error("invalid stage transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("run {run_id} was superseded by a newer trigger")]
    Superseded { run_id: Uuid },
}

// ---------------------------------------------------------------------------
// Public views
// ---------------------------------------------------------------------------

/// Returned once the executor has acknowledged a trigger.
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub run_id: Uuid,
    pub execution_id: String,
    pub version: String,
}

/// Everything the presentation layer shows about the current run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub stages: BTreeMap<StageName, StageStatus>,
    pub retries: RetryCounts,
    pub validation_warnings: Vec<String>,
    pub execution: Option<ExecutionView>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Bookkeeping for the run that is still in flight.
struct InFlight {
    run_id: Uuid,
    cancel: CancellationToken,
    /// Validation findings from the acknowledgement, surfaced by the timeline.
    report: Option<ValidationReport>,
}

struct ControllerState {
    current: Option<Execution>,
    in_flight: Option<InFlight>,
    ledger: ExecutionHistoryLedger,
    next_id: u64,
}

impl ControllerState {
    /// Whether `run_id` is the in-flight run and still the current execution.
    fn owns(&self, run_id: Uuid) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.run_id == run_id)
            && self.current.as_ref().is_some_and(|e| e.run_id == run_id)
    }
}

struct Inner {
    executor: Arc<dyn PipelineExecutor>,
    timeline: TimelineConfig,
    store: Option<HistoryStore>,
    events: EventBus,
    state: RwLock<ControllerState>,
    /// Id of the in-flight run, `None` when idle.
    idle: watch::Sender<Option<Uuid>>,
}

// ---------------------------------------------------------------------------
// TriggerController
// ---------------------------------------------------------------------------

/// Drives runs and exposes their state. Cheap to clone.
#[derive(Clone)]
pub struct TriggerController {
    inner: Arc<Inner>,
}

impl TriggerController {
    /// A controller whose history lives in memory only.
    pub fn new(executor: Arc<dyn PipelineExecutor>, timeline: TimelineConfig) -> Self {
        Self::build(executor, timeline, None, ExecutionHistoryLedger::new())
    }

    /// A controller that mirrors its history into `store` and starts from the
    /// entries already persisted there.
    pub fn with_store(
        executor: Arc<dyn PipelineExecutor>,
        timeline: TimelineConfig,
        store: HistoryStore,
    ) -> anyhow::Result<Self> {
        let ledger = ExecutionHistoryLedger::from_recent(store.load_recent(LEDGER_CAPACITY)?);
        info!(entries = ledger.len(), "rehydrated history ledger");
        Ok(Self::build(executor, timeline, Some(store), ledger))
    }

    fn build(
        executor: Arc<dyn PipelineExecutor>,
        timeline: TimelineConfig,
        store: Option<HistoryStore>,
        ledger: ExecutionHistoryLedger,
    ) -> Self {
        let next_id = ledger.max_id().map_or(1, |id| id + 1);
        let (idle, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                executor,
                timeline,
                store,
                events: EventBus::new(),
                state: RwLock::new(ControllerState {
                    current: None,
                    in_flight: None,
                    ledger,
                    next_id,
                }),
                idle,
            }),
        }
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.inner.timeline.overlap
    }

    /// Trigger a run for `location` (`"City,cc"`).
    ///
    /// Resolves once the executor has answered. On acknowledgement the stage
    /// timeline keeps advancing in the background; on rejection the run has
    /// already been recorded as failed when this returns. The executor call
    /// runs in its own task, so dropping this future does not strand the run.
    pub async fn trigger(&self, location: &str) -> Result<Accepted, TriggerError> {
        let location: Location = location.parse()?;
        let (run_id, cancel) = self.inner.begin(location.clone()).await?;
        let request = TriggerRequest::from(&location);
        info!(%run_id, location = %location, "triggering pipeline");

        let inner = Arc::clone(&self.inner);
        let dispatch = tokio::spawn(async move { inner.dispatch(run_id, cancel, request).await });
        match dispatch.await {
            Ok(result) => result,
            Err(e) => {
                error!(%run_id, error = %e, "trigger task failed");
                Err(TriggerError::ExecutorUnreachable(format!("trigger task failed: {e}")))
            }
        }
    }

    /// Trigger a run and wait until it reaches its terminal outcome.
    ///
    /// Executor rejection is reported as an error; the failed run is still in
    /// the ledger.
    pub async fn run_to_completion(&self, location: &str) -> Result<HistoryEntry, TriggerError> {
        let mut events = self.subscribe();
        let accepted = self.trigger(location).await?;
        loop {
            match events.recv().await {
                Ok(PipelineEvent::RunFinished { run_id, entry }) if run_id == accepted.run_id => {
                    self.wait_settled(run_id).await;
                    return Ok(entry);
                }
                Ok(PipelineEvent::RunAbandoned { run_id }) if run_id == accepted.run_id => {
                    return Err(TriggerError::Superseded { run_id });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, reading result from the ledger");
                    return self.settled_entry(accepted.run_id).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TriggerError::Superseded {
                        run_id: accepted.run_id,
                    });
                }
            }
        }
    }

    /// Wait until no run is in flight and the last one has been persisted.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|run| run.is_none()).await;
    }

    async fn wait_settled(&self, run_id: Uuid) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|run| *run != Some(run_id)).await;
    }

    /// The ledger entry of `run_id` once it has settled. A run that settled
    /// without an entry was abandoned.
    async fn settled_entry(&self, run_id: Uuid) -> Result<HistoryEntry, TriggerError> {
        self.wait_settled(run_id).await;
        let state = self.inner.state.read().await;
        let entry = state
            .ledger
            .all()
            .find(|e| e.run_id == Some(run_id))
            .cloned();
        entry.ok_or(TriggerError::Superseded { run_id })
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.in_flight.is_some()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.inner.state.read().await;
        match &state.current {
            Some(exec) => StatusSnapshot {
                running: state.in_flight.is_some(),
                stages: exec.stages.as_map(),
                retries: exec.retries.counts(),
                validation_warnings: exec.warnings.as_slice().to_vec(),
                execution: Some(exec.view()),
            },
            None => StatusSnapshot {
                running: false,
                stages: StageStateMachine::new().as_map(),
                retries: RetryCounts::default(),
                validation_warnings: Vec::new(),
                execution: None,
            },
        }
    }

    /// Ledger contents, most recent first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state.read().await.ledger.to_vec()
    }

    pub async fn statistics(&self) -> Statistics {
        history::statistics(&self.inner.state.read().await.ledger)
    }

    pub async fn audit_rows(&self) -> Vec<AuditRow> {
        history::audit_rows(&self.inner.state.read().await.ledger)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

impl Inner {
    /// Apply the overlap policy and install a fresh execution.
    async fn begin(&self, location: Location) -> Result<(Uuid, CancellationToken), TriggerError> {
        let (run_id, cancel, superseded) = {
            let mut state = self.state.write().await;

            let mut superseded = None;
            if state.in_flight.is_some() {
                match self.timeline.overlap {
                    OverlapPolicy::Reject => {
                        let location = state
                            .current
                            .as_ref()
                            .map(|e| e.location.to_string())
                            .unwrap_or_default();
                        warn!(%location, "trigger rejected: run already in flight");
                        return Err(TriggerError::AlreadyRunning { location });
                    }
                    OverlapPolicy::Supersede => superseded = self.supersede(&mut state),
                }
            }

            let mut execution = Execution::new(location, Utc::now());
            execution.stages.reset();
            execution.retries.reset();
            execution.warnings.clear();
            execution
                .stages
                .advance(StageName::Collector, StageStatus::Loading)?;

            let run_id = execution.run_id;
            let cancel = CancellationToken::new();

            self.events.emit(PipelineEvent::RunStarted {
                run_id,
                location: execution.location.city.clone(),
                country: execution.location.country.clone(),
            });
            self.events.emit(PipelineEvent::StageChanged {
                run_id,
                stage: StageName::Collector,
                status: StageStatus::Loading,
            });

            state.current = Some(execution);
            state.in_flight = Some(InFlight {
                run_id,
                cancel: cancel.clone(),
                report: None,
            });
            self.idle.send_replace(Some(run_id));
            (run_id, cancel, superseded)
        };

        self.persist(superseded).await;
        Ok((run_id, cancel))
    }

    /// Cancel the in-flight run. An acknowledged run is recorded as the
    /// success the executor already reported; an unanswered one is dropped.
    fn supersede(&self, state: &mut ControllerState) -> Option<HistoryEntry> {
        let prev = state.in_flight.take()?;
        prev.cancel.cancel();

        let exec = state.current.as_mut().filter(|e| e.run_id == prev.run_id)?;
        if !exec.is_acknowledged() {
            info!(run_id = %prev.run_id, "abandoning unanswered run");
            self.events.emit(PipelineEvent::RunAbandoned { run_id: prev.run_id });
            return None;
        }

        if let Some(report) = &prev.report {
            exec.warnings.surface(report);
        }
        info!(run_id = %prev.run_id, "superseded acknowledged run, recording success");
        self.record(state, Outcome::Success)
    }

    /// Call the executor for `run_id` and record its answer.
    async fn dispatch(
        self: Arc<Self>,
        run_id: Uuid,
        cancel: CancellationToken,
        request: TriggerRequest,
    ) -> Result<Accepted, TriggerError> {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%run_id, "run superseded while awaiting executor");
                return Err(TriggerError::Superseded { run_id });
            }
            r = self.executor.trigger(&request) => r,
        };

        match result {
            Ok(response) => self.acknowledge(run_id, response).await,
            Err(e) => {
                let message = e.to_string();
                warn!(%run_id, error = %message, "executor rejected trigger");
                self.fail(run_id, message.clone()).await?;
                Err(TriggerError::ExecutorUnreachable(message))
            }
        }
    }

    async fn acknowledge(
        self: &Arc<Self>,
        run_id: Uuid,
        response: TriggerResponse,
    ) -> Result<Accepted, TriggerError> {
        let cancel = {
            let mut state = self.state.write().await;
            if !state.owns(run_id) {
                return Err(TriggerError::Superseded { run_id });
            }
            let ControllerState {
                current, in_flight, ..
            } = &mut *state;
            let (Some(exec), Some(flight)) = (current.as_mut(), in_flight.as_mut()) else {
                return Err(TriggerError::Superseded { run_id });
            };

            exec.execution_id = Some(response.execution_id.clone());
            exec.version = Some(response.version.clone());
            exec.collected_items = response.collected_items;
            exec.retries.record_all(response.retries);
            flight.report = Some(response.validation_report());

            self.events.emit(PipelineEvent::Acknowledged {
                run_id,
                execution_id: response.execution_id.clone(),
                version: response.version.clone(),
            });
            self.events.emit(PipelineEvent::RetriesRecorded {
                run_id,
                retries: response.retries,
            });
            flight.cancel.clone()
        };

        info!(
            %run_id,
            execution_id = %response.execution_id,
            version = %response.version,
            "executor acknowledged trigger"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.drive_timeline(run_id, cancel).await });

        Ok(Accepted {
            run_id,
            execution_id: response.execution_id,
            version: response.version,
        })
    }

    /// Record an executor rejection against the stage that was loading.
    async fn fail(&self, run_id: Uuid, message: String) -> Result<(), TriggerError> {
        let (entry, defect) = {
            let mut state = self.state.write().await;
            if !state.owns(run_id) {
                return Err(TriggerError::Superseded { run_id });
            }
            let defect = self.mark_current_failed(&mut state, run_id, message);
            let entry = self.record(&mut state, Outcome::Error);
            self.clear_in_flight(&mut state);
            (entry, defect)
        };

        self.persist(entry).await;
        self.settle(run_id);
        match defect {
            Some(e) => Err(TriggerError::InvalidTransition(e)),
            None => Ok(()),
        }
    }

    /// End the run as failed because the timeline hit a sequencing defect.
    async fn abort(&self, run_id: Uuid, defect: TransitionError) {
        error!(%run_id, error = %defect, "invalid stage transition, aborting run");
        let entry = {
            let mut state = self.state.write().await;
            if !state.owns(run_id) {
                return;
            }
            let message = format!("internal error: {defect}");
            if let Some(second) = self.mark_current_failed(&mut state, run_id, message) {
                error!(%run_id, error = %second, "could not mark failed stage");
            }
            let entry = self.record(&mut state, Outcome::Error);
            self.clear_in_flight(&mut state);
            entry
        };
        self.persist(entry).await;
        self.settle(run_id);
    }

    fn mark_current_failed(
        &self,
        state: &mut ControllerState,
        run_id: Uuid,
        message: String,
    ) -> Option<TransitionError> {
        let exec = state.current.as_mut()?;
        exec.error_message = Some(message);
        let stage = exec.stages.failure_target();
        match exec.stages.mark_failed(stage) {
            Ok(()) => {
                self.events.emit(PipelineEvent::StageChanged {
                    run_id,
                    stage,
                    status: StageStatus::Error,
                });
                None
            }
            Err(e) => Some(e),
        }
    }

    /// Turn the current execution into a ledger entry.
    fn record(&self, state: &mut ControllerState, outcome: Outcome) -> Option<HistoryEntry> {
        let exec = state.current.as_mut()?;
        exec.outcome = Some(outcome);

        let id = state.next_id;
        state.next_id += 1;
        let run_id = exec.run_id;
        let entry = HistoryEntry::record(id, exec, outcome, Utc::now());

        if let Some(evicted) = state.ledger.append(entry.clone()) {
            debug!(id = evicted.id, "evicted oldest history entry");
        }
        info!(
            %run_id,
            id = entry.id,
            status = %entry.status,
            execution_id = %entry.execution_id,
            "run recorded"
        );
        self.events.emit(PipelineEvent::RunFinished {
            run_id,
            entry: entry.clone(),
        });
        Some(entry)
    }

    fn clear_in_flight(&self, state: &mut ControllerState) {
        state.in_flight = None;
    }

    /// Announce that `run_id` is fully settled, unless a newer run took over.
    fn settle(&self, run_id: Uuid) {
        self.idle.send_if_modified(|current| {
            if *current == Some(run_id) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    async fn persist(&self, entry: Option<HistoryEntry>) {
        let (Some(store), Some(entry)) = (self.store.clone(), entry) else {
            return;
        };
        let id = entry.id;
        match tokio::task::spawn_blocking(move || store.save(&entry)).await {
            Ok(Ok(())) => debug!(id, "history entry persisted"),
            Ok(Err(e)) => error!(id, error = %e, "Failed to persist history entry"),
            Err(e) => error!(id, error = %e, "History persistence task failed"),
        }
    }
}
