//! API route definitions.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use super::error::ApiError;
use super::state::AppState;
use crate::location::{self, DEFAULT_LOCATION};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/history", get(history))
        .route("/stats", get(stats))
        .route("/audit", get(audit))
        .route("/locations", get(locations))
        .route("/trigger", post(trigger))
        .route("/events", get(events))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.controller.snapshot().await;
    Json(json!({ "data": snapshot, "meta": meta() }))
}

async fn history(State(state): State<AppState>) -> Json<Value> {
    let entries = state.controller.history().await;
    Json(json!({
        "data": entries,
        "meta": { "total": entries.len() }
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.controller.statistics().await;
    Json(json!({
        "data": stats,
        "meta": { "success_rate": stats.success_rate() }
    }))
}

async fn audit(State(state): State<AppState>) -> Json<Value> {
    let rows = state.controller.audit_rows().await;
    Json(json!({
        "data": rows,
        "meta": { "total": rows.len() }
    }))
}

async fn locations() -> Json<Value> {
    Json(json!({
        "data": location::presets(),
        "meta": { "default": DEFAULT_LOCATION }
    }))
}

#[derive(Debug, Default, Deserialize)]
struct TriggerBody {
    #[serde(default)]
    location: Option<String>,
}

async fn trigger(
    State(state): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let location = body.location.as_deref().unwrap_or(DEFAULT_LOCATION);
    let accepted = state.controller.trigger(location).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "data": accepted, "meta": meta() })),
    ))
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.controller.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => tracing::warn!(error = %e, "failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
