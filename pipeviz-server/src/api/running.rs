//! Running Pipelines API Handlers
//!
//! HTTP handlers for the list of currently executing pipelines and its live
//! event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Serialize;

use pipeviz_core::domain::{RunningPipeline, StreamEvent};
use pipeviz_core::links::PipelineLinks;
use pipeviz_core::trace::TraceLinker;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::path::RunPath;
use super::stream::{event_stream, json_event, sse_event};

/// A running pipeline with its provider and trace links
#[derive(Debug, Clone, Serialize)]
pub struct RunningPipelineView {
    #[serde(flatten)]
    pub pipeline: RunningPipeline,
    #[serde(flatten)]
    pub links: PipelineLinks,
    pub trace_url: String,
}

impl RunningPipelineView {
    pub fn new(pipeline: RunningPipeline, trace: &TraceLinker) -> Self {
        let links = PipelineLinks::for_pipeline(&pipeline);
        let trace_url = pipeline
            .pipeline
            .trace_id
            .as_deref()
            .map(|id| trace.trace_url(id))
            .unwrap_or_default();

        Self {
            pipeline,
            links,
            trace_url,
        }
    }
}

/// GET /running
/// List running pipelines, oldest first
pub async fn list_running(State(state): State<AppState>) -> Json<Vec<RunningPipelineView>> {
    let pipelines = state
        .registry
        .snapshot()
        .into_iter()
        .map(|p| RunningPipelineView::new(p, &state.trace))
        .collect();

    Json(pipelines)
}

/// GET /running/{owner}/{repo}/{branch}/{build}
/// Get one running pipeline
pub async fn get_running(
    State(state): State<AppState>,
    Path(path): Path<RunPath>,
) -> ApiResult<Json<RunningPipelineView>> {
    let run = path.into_run_ref()?;

    let pipeline = state
        .registry
        .find(&run)
        .ok_or(ApiError::NotRunning(run))?;

    Ok(Json(RunningPipelineView::new(pipeline, &state.trace)))
}

/// GET /running/events
/// Stream registry changes, starting with a snapshot
pub async fn running_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.registry.subscribe();
    tracing::debug!("Running events viewer {} connected", subscription.id());

    let trace = state.trace.clone();
    let render = move |event: &StreamEvent| render_running(event, &trace);

    Sse::new(event_stream(subscription, (), render)).keep_alive(KeepAlive::default())
}

/// Frames registry events, attaching links to every pipeline payload
fn render_running(event: &StreamEvent, trace: &Arc<TraceLinker>) -> Option<Event> {
    match event {
        StreamEvent::Snapshot(pipelines) => {
            let views: Vec<RunningPipelineView> = pipelines
                .iter()
                .cloned()
                .map(|p| RunningPipelineView::new(p, trace))
                .collect();
            json_event(event.event_type(), &views)
        }
        StreamEvent::PipelineUpdated(pipeline) => json_event(
            event.event_type(),
            &RunningPipelineView::new(pipeline.clone(), trace),
        ),
        other => sse_event(other),
    }
}
