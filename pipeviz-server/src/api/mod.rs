//! API Module
//!
//! HTTP API layer for the visualizer.
//! Each submodule handles endpoints for a specific view.

pub mod error;
pub mod health;
pub mod live;
pub mod path;
pub mod running;
pub mod stream;
pub mod teams;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use pipeviz_core::trace::TraceLinker;

use crate::service::{LiveLogSessions, RunningPipelines};

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RunningPipelines>,
    pub live_logs: LiveLogSessions,
    pub trace: Arc<TraceLinker>,
    /// Namespace being watched; the only team old links may address
    pub namespace: String,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/healthz", get(health::healthz))
        // Running pipelines
        .route("/running", get(running::list_running))
        .route("/running/events", get(running::running_events))
        .route(
            "/running/{owner}/{repo}/{branch}/{build}",
            get(running::get_running),
        )
        // Links from the former team-scoped layout
        .route(
            "/teams/{team}/projects/{owner}/{repo}/{branch}/{build}",
            get(teams::team_project_redirect),
        )
        // Live logs
        .route(
            "/{owner}/{repo}/{branch}/{build}/logs/live",
            get(live::live_logs),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
