//! Mapping of controller failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::controller::TriggerError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        let (status, kind) = match &err {
            TriggerError::InvalidLocation(_) => (StatusCode::BAD_REQUEST, "invalid_location"),
            TriggerError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
            TriggerError::Superseded { .. } => (StatusCode::CONFLICT, "superseded"),
            TriggerError::ExecutorUnreachable(_) => (StatusCode::BAD_GATEWAY, "executor_unreachable"),
            TriggerError::InvalidTransition(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_transition")
            }
        };
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, error = %self.message, "request failed");
        } else {
            tracing::debug!(kind = self.kind, error = %self.message, "request rejected");
        }
        let body = json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
