//! Change notifications for the presentation layer.
//!
//! Every observable mutation of the current execution or the ledger is
//! published on a broadcast channel. Slow subscribers may lag and miss
//! events; they can always resynchronise from a status snapshot.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::history::HistoryEntry;
use crate::pipeline::{RetryCounts, StageName, StageStatus};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        location: String,
        country: String,
    },
    Acknowledged {
        run_id: Uuid,
        execution_id: String,
        version: String,
    },
    StageChanged {
        run_id: Uuid,
        stage: StageName,
        status: StageStatus,
    },
    RetriesRecorded {
        run_id: Uuid,
        retries: RetryCounts,
    },
    WarningsRaised {
        run_id: Uuid,
        warnings: Vec<String>,
    },
    RunFinished {
        run_id: Uuid,
        entry: HistoryEntry,
    },
    /// The run was replaced by a newer trigger before the executor answered.
    RunAbandoned {
        run_id: Uuid,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::Acknowledged { run_id, .. }
            | PipelineEvent::StageChanged { run_id, .. }
            | PipelineEvent::RetriesRecorded { run_id, .. }
            | PipelineEvent::WarningsRaised { run_id, .. }
            | PipelineEvent::RunFinished { run_id, .. }
            | PipelineEvent::RunAbandoned { run_id } => *run_id,
        }
    }

    /// Short name used as the SSE event type.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::Acknowledged { .. } => "acknowledged",
            PipelineEvent::StageChanged { .. } => "stage_changed",
            PipelineEvent::RetriesRecorded { .. } => "retries_recorded",
            PipelineEvent::WarningsRaised { .. } => "warnings_raised",
            PipelineEvent::RunFinished { .. } => "run_finished",
            PipelineEvent::RunAbandoned { .. } => "run_abandoned",
        }
    }
}

/// Fan-out of [`PipelineEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit(PipelineEvent::StageChanged {
            run_id,
            stage: StageName::Collector,
            status: StageStatus::Loading,
        });
        bus.emit(PipelineEvent::RunAbandoned { run_id });

        assert_eq!(rx.recv().await.unwrap().kind(), "stage_changed");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind(), "run_abandoned");
        assert_eq!(second.run_id(), run_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        EventBus::new().emit(PipelineEvent::RunAbandoned { run_id: Uuid::new_v4() });
    }

    #[test]
    fn test_event_json_shape() {
        let event = PipelineEvent::StageChanged {
            run_id: Uuid::nil(),
            stage: StageName::Validator,
            status: StageStatus::Success,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_changed");
        assert_eq!(json["data"]["stage"], "validator");
        assert_eq!(json["data"]["status"], "success");
    }
}
