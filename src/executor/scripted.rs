//! In-process executor with scripted replies.
//!
//! Used by the test-suite and by `--offline` runs where no webhook is
//! available.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ExecutorError, PipelineExecutor, TriggerRequest, TriggerResponse};

#[derive(Debug, Clone)]
struct Reply {
    delay: Duration,
    result: Result<TriggerResponse, ExecutorError>,
}

/// Replies from a queue; once the queue is empty every trigger succeeds with
/// a freshly generated execution id.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<TriggerRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful acknowledgement.
    pub async fn push_ok(&self, response: TriggerResponse) {
        self.push(Duration::ZERO, Ok(response)).await;
    }

    /// Queue a failure carrying `message`.
    pub async fn push_err(&self, message: impl Into<String>) {
        self.push(Duration::ZERO, Err(ExecutorError::Unreachable(message.into())))
            .await;
    }

    /// Queue a reply that resolves after `delay`.
    pub async fn push(&self, delay: Duration, result: Result<TriggerResponse, ExecutorError>) {
        self.replies.lock().await.push_back(Reply { delay, result });
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().await.clone()
    }

    fn generated_response() -> TriggerResponse {
        let now = chrono::Utc::now();
        let mut resp = TriggerResponse::new(
            Uuid::new_v4().to_string(),
            crate::history::audit_version_label(now),
        );
        resp.timestamp = Some(now.to_rfc3339());
        resp
    }
}

#[async_trait::async_trait]
impl PipelineExecutor for ScriptedExecutor {
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ExecutorError> {
        self.requests.lock().await.push(request.clone());

        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Ok(Self::generated_response()),
        }
    }
}
