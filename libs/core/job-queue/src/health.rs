//! Health and admin handlers for queue workers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`), ready while the broker is connected
//! - Queue monitoring (`/queue/info`)
//! - Prometheus metrics (`/metrics`)
//! - Dead-letter listing (`/admin/dead-letters?limit=N`)

use crate::broker::ConnectionState;
use crate::metrics;
use crate::queue::Queue;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub queue: Queue,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(queue: Queue, app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            queue,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" if responding
    pub status: String,
    pub name: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Liveness probe handler. Always OK while the server runs.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
        timestamp: Utc::now(),
    })
}

/// Readiness probe handler. Ready only while the broker is connected.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let broker = state.queue.broker().state();
    let status = if broker == ConnectionState::Connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let label = if status == StatusCode::OK {
        "ready"
    } else {
        "not_ready"
    };

    (
        status,
        Json(json!({
            "status": label,
            "checks": {
                "broker": broker,
            }
        })),
    )
}

/// Queue counters for monitoring.
pub async fn queue_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.queue.stats().await {
        Ok(stats) => Ok(Json(json!({
            "queue": state.queue.name(),
            "consumer_id": state.queue.consumer_id(),
            "broker": state.queue.broker().state(),
            "stats": stats,
        }))),
        Err(e) if e.is_broker_unavailable() => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to get queue info: {e}") })),
        )),
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        )
            .into_response(),
    }
}

/// Query parameters for the dead-letter listing.
#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    /// Maximum entries to return (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// List retained dead letters, newest first.
///
/// `GET /admin/dead-letters?limit=10`
pub async fn dead_letters_handler(
    State(state): State<HealthState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = params.limit.min(100);

    match state.queue.dead_letters(limit).await {
        Ok(letters) => Ok(Json(json!({
            "count": letters.len(),
            "limit": limit,
            "dead_letters": letters,
        }))),
        Err(e) if e.is_broker_unavailable() => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Router with the health, monitoring and admin endpoints.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queue/info", get(queue_info_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/dead-letters", get(dead_letters_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
