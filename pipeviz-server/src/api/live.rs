//! Live Log API Handler
//!
//! Streams one run's step output to a viewer as it is produced.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;

use super::AppState;
use super::error::ApiResult;
use super::path::RunPath;
use super::stream::{event_stream, sse_event};

/// GET /{owner}/{repo}/{branch}/{build}/logs/live
/// Follow a run's logs until it ends
///
/// Every request gets its own session; closing the connection stops the
/// session's cluster log follows.
pub async fn live_logs(
    State(state): State<AppState>,
    Path(path): Path<RunPath>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let run = path.into_run_ref()?;

    let session = state.live_logs.open(run.clone());
    tracing::info!("Live log viewer {} connected to {}", session.id(), run);

    let (subscription, guard) = session.into_parts();
    let events = event_stream(subscription, guard, sse_event);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
