// ============================================================================
// Worker HTTP surface
// ============================================================================
//
// GET /health   liveness
// GET /metrics  Prometheus text format
// GET /status   scheduler, guard and lock circuit state as JSON
//
// ============================================================================

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use eventpull_metrics::gather_metrics;
use eventpull_shared::IngestionScheduler;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    pub started: bool,
    pub pass_running: bool,
    pub passes_started: u64,
    pub last_pass_started: Option<DateTime<Utc>>,
    /// `None` when the distributed lock is disabled
    pub lock_circuit_state: Option<String>,
    pub targets: usize,
}

pub fn router(scheduler: Arc<IngestionScheduler>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .with_state(scheduler)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Failed to gather metrics: {}", e),
        ),
    }
}

async fn status_handler(State(scheduler): State<Arc<IngestionScheduler>>) -> Json<WorkerStatus> {
    let guard = scheduler.guard();
    let lock_circuit_state = match scheduler.mutex() {
        Some(mutex) => Some(mutex.circuit_state().await.to_string()),
        None => None,
    };

    Json(WorkerStatus {
        started: scheduler.is_started().await,
        pass_running: guard.is_running(),
        passes_started: guard.passes_started(),
        last_pass_started: guard.last_started(),
        lock_circuit_state,
        targets: scheduler.targets().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use eventpull_config::SchedulerConfig;
    use eventpull_shared::{
        ClientRegistry, CoordinatorOptions, InMemoryBroker, IngestionCoordinator, LoggingHandler,
    };
    use tower::ServiceExt;

    fn scheduler() -> Arc<IngestionScheduler> {
        let coordinator = IngestionCoordinator::new(
            ClientRegistry::new(Arc::new(InMemoryBroker::new())),
            Arc::new(LoggingHandler),
            CoordinatorOptions::default(),
        );
        let config = SchedulerConfig {
            lock_disabled: true,
            ..SchedulerConfig::default()
        };
        Arc::new(IngestionScheduler::new(config, coordinator, None, Vec::new()))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_body(router(scheduler()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_status_after_one_pass() {
        let scheduler = scheduler();
        scheduler.run_once().await;

        let (status, body) = get_body(router(scheduler), "/status").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["started"], false);
        assert_eq!(json["passes_started"], 1);
        assert!(json["lock_circuit_state"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_exposes_pass_counter() {
        let scheduler = scheduler();
        scheduler.run_once().await;

        let (status, body) = get_body(router(scheduler), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("eventpull_passes_total"));
    }
}
