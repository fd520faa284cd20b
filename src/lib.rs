//! stagewatch -- live status, bounded history and audit view for a remote
//! four-stage data pipeline.
//!
//! The pipeline itself (collect, validate, process, report) runs in an
//! external executor reached over a webhook. This crate triggers it, tracks
//! each stage of the current run, records finished runs in a 20-entry ledger
//! and derives statistics and an audit log from that ledger.

pub mod api;
pub mod config;
pub mod controller;
pub mod events;
pub mod executor;
pub mod history;
pub mod location;
pub mod pipeline;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::StagewatchConfig;
use crate::controller::TriggerController;
use crate::executor::{PipelineExecutor, ScriptedExecutor, WebhookExecutor};
use crate::history::{ExecutionHistoryLedger, LEDGER_CAPACITY};
use crate::storage::HistoryStore;

/// Assemble a controller from configuration.
///
/// With `offline` set, triggers are answered in-process instead of calling
/// the webhook.
pub fn build_controller(config: &StagewatchConfig, offline: bool) -> Result<TriggerController> {
    let executor: Arc<dyn PipelineExecutor> = if offline {
        tracing::info!("Using in-process executor");
        Arc::new(ScriptedExecutor::new())
    } else {
        tracing::info!(url = %config.executor.url, "Using webhook executor");
        Arc::new(WebhookExecutor::new(
            config.executor.url.clone(),
            config.executor.timeout(),
        )?)
    };

    match config.storage.db_path() {
        Some(path) => {
            tracing::info!(db_path = %path.display(), "Initializing database");
            let store = HistoryStore::new(storage::open_pool(path)?);
            TriggerController::with_store(executor, config.timeline.clone(), store)
        }
        None => Ok(TriggerController::new(executor, config.timeline.clone())),
    }
}

/// Read the persisted ledger without starting a controller.
pub fn load_history(config: &StagewatchConfig) -> Result<ExecutionHistoryLedger> {
    let Some(path) = config.storage.db_path() else {
        tracing::warn!("storage.in_memory is set, no persisted history to read");
        return Ok(ExecutionHistoryLedger::new());
    };
    let store = HistoryStore::new(storage::open_pool(path)?);
    Ok(ExecutionHistoryLedger::from_recent(
        store.load_recent(LEDGER_CAPACITY)?,
    ))
}

/// Start the stagewatch daemon: controller plus API server.
pub async fn serve(config: &StagewatchConfig) -> Result<()> {
    let controller = build_controller(config, false)?;
    let app = api::router(api::state::AppState::new(controller));

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!(%addr, overlap = ?config.timeline.overlap, "stagewatch listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("stagewatch shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
