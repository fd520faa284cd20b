//! End-to-end runs against an in-process webhook standing in for the executor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use stagewatch::config::{OverlapPolicy, TimelineConfig};
use stagewatch::controller::{TriggerController, TriggerError};
use stagewatch::executor::{ExecutorError, PipelineExecutor, TriggerRequest, WebhookExecutor};
use stagewatch::history::NOT_AVAILABLE;
use stagewatch::pipeline::{Outcome, StageName, StageStatus};

#[derive(Clone, Default)]
struct Stub {
    received: Arc<Mutex<Vec<Value>>>,
    fail: bool,
}

async fn collect(State(stub): State<Stub>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    stub.received.lock().await.push(body.clone());
    if stub.fail {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "workflow is not active" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "execution_id": "stub-1",
            "version": "v2025-10-25_1761386400000",
            "collected_items": 2,
            "timestamp": "2025-10-25T10:00:00Z",
            "retries": { "weather": 1, "bitcoin": 3 },
            "validation_issue": true
        })),
    )
}

async fn spawn_stub(stub: Stub) -> SocketAddr {
    let app = Router::new()
        .route("/webhook/collect-data", post(collect))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn webhook(addr: SocketAddr) -> WebhookExecutor {
    WebhookExecutor::new(
        format!("http://{addr}/webhook/collect-data"),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_webhook_posts_location_and_parses_ack() {
    let stub = Stub::default();
    let addr = spawn_stub(stub.clone()).await;

    let resp = webhook(addr)
        .trigger(&TriggerRequest {
            location: "Tokyo".to_string(),
            country: "jp".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(resp.execution_id, "stub-1");
    assert_eq!(resp.collected_items, Some(2));
    assert_eq!(resp.retries.bitcoin, 3);
    assert!(resp.validation_issue);

    let received = stub.received.lock().await;
    assert_eq!(received[0], json!({ "location": "Tokyo", "country": "jp" }));
}

#[tokio::test]
async fn test_webhook_non_success_status_is_rejected() {
    let addr = spawn_stub(Stub {
        fail: true,
        ..Stub::default()
    })
    .await;

    let err = webhook(addr)
        .trigger(&TriggerRequest {
            location: "London".to_string(),
            country: "uk".to_string(),
        })
        .await
        .unwrap_err();

    match err {
        ExecutorError::Rejected { status, message } => {
            assert_eq!(status, 503);
            assert!(message.contains("workflow is not active"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_webhook() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let err = webhook(addr)
        .trigger(&TriggerRequest {
            location: "London".to_string(),
            country: "uk".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Unreachable(_)));
}

#[tokio::test]
async fn test_controller_full_run_over_webhook() {
    let addr = spawn_stub(Stub::default()).await;
    let controller = TriggerController::new(
        Arc::new(webhook(addr)),
        TimelineConfig::immediate(OverlapPolicy::Reject),
    );

    let entry = controller.run_to_completion("Paris,fr").await.unwrap();
    assert_eq!(entry.status, Outcome::Success);
    assert_eq!(entry.execution_id, "stub-1");
    assert_eq!(entry.location, "Paris");
    assert_eq!(entry.retries.weather, 1);
    assert_eq!(entry.validation_warnings, 2);

    let snapshot = controller.snapshot().await;
    assert!(StageName::ALL
        .iter()
        .all(|s| snapshot.stages[s] == StageStatus::Success));
    assert_eq!(controller.statistics().await.successful, 1);
}

#[tokio::test]
async fn test_controller_records_failed_webhook_run() {
    let addr = spawn_stub(Stub {
        fail: true,
        ..Stub::default()
    })
    .await;
    let controller = TriggerController::new(
        Arc::new(webhook(addr)),
        TimelineConfig::immediate(OverlapPolicy::Reject),
    );

    let err = controller.trigger("London,uk").await.unwrap_err();
    assert!(matches!(err, TriggerError::ExecutorUnreachable(_)));

    let history = controller.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, Outcome::Error);
    assert_eq!(history[0].execution_id, NOT_AVAILABLE);
    assert_eq!(history[0].failed_stage, Some(StageName::Collector));

    let stats = controller.statistics().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.successful, 0);
}
