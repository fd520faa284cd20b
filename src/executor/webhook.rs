//! HTTP webhook executor.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

use super::{ExecutorError, PipelineExecutor, TriggerRequest, TriggerResponse};

const MAX_ERROR_BODY: usize = 200;

/// Triggers the pipeline by POSTing the request as JSON to a webhook.
pub struct WebhookExecutor {
    client: Client,
    url: String,
}

impl WebhookExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl PipelineExecutor for WebhookExecutor {
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ExecutorError> {
        debug!(url = %self.url, location = %request.location, "posting trigger");

        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let mut message = resp.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| message.is_char_boundary(*i))
                    .unwrap_or(0);
                message.truncate(cut);
            }
            return Err(ExecutorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<TriggerResponse>()
            .await
            .map_err(|e| ExecutorError::Malformed(e.to_string()))
    }
}
