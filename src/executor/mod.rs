//! The remote pipeline executor.
//!
//! The executor performs the real four-stage work. This crate only sends it a
//! trigger and observes the acknowledgement.

pub mod scripted;
pub mod webhook;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::Location;
use crate::pipeline::{RetryCounts, ValidationReport};

pub use self::scripted::ScriptedExecutor;
pub use self::webhook::WebhookExecutor;

/// Default trigger endpoint of the executor.
pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:5678/webhook/collect-data";

/// Body of the trigger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub location: String,
    pub country: String,
}

impl From<&Location> for TriggerRequest {
    fn from(loc: &Location) -> Self {
        Self {
            location: loc.city.clone(),
            country: loc.country.clone(),
        }
    }
}

/// Acknowledgement returned once the executor has run the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub execution_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Retries the executor absorbed per upstream source.
    #[serde(default)]
    pub retries: RetryCounts,
    #[serde(default)]
    pub validation_warnings: Vec<String>,
    #[serde(default)]
    pub validation_issue: bool,
}

impl TriggerResponse {
    pub fn new(execution_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            version: version.into(),
            collected_items: None,
            timestamp: None,
            retries: RetryCounts::default(),
            validation_warnings: Vec::new(),
            validation_issue: false,
        }
    }

    pub fn validation_report(&self) -> ValidationReport {
        ValidationReport {
            warnings: self.validation_warnings.clone(),
            issue: self.validation_issue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Unreachable(String),

    #[error("executor returned status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed executor response: {0}")]
    Malformed(String),
}

/// Something that can run the pipeline for a location.
#[async_trait::async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Issue one trigger. Resolves when the executor acknowledges or fails.
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ExecutorError>;
}
