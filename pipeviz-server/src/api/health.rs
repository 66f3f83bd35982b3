//! Health Check API Handler
//!
//! Liveness endpoints: a bare status check and one that also reports how
//! busy the server is.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use super::AppState;

/// GET /healthz
/// Empty 200 for orchestrator liveness checks
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "running_pipelines": state.registry.len(),
            "live_log_sessions": state.live_logs.active(),
        })),
    )
}
