//! Event-stream framing
//!
//! Turns a broker subscription into a server-sent event stream. The stream
//! owns the subscription (and whatever guard the caller attaches), so a
//! viewer disconnecting drops both.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, stream};
use serde::Serialize;

use pipeviz_core::domain::StreamEvent;

use crate::service::Subscription;

/// Default framing: the event's type name and its JSON payload
pub fn sse_event(event: &StreamEvent) -> Option<Event> {
    match event.data() {
        Ok(data) => Some(Event::default().event(event.event_type()).data(data)),
        Err(e) => {
            tracing::warn!("Dropping unserializable {} event: {}", event.event_type(), e);
            None
        }
    }
}

/// Frames a custom payload under an event type name
pub fn json_event<T: Serialize>(event_type: &str, payload: &T) -> Option<Event> {
    match Event::default().event(event_type).json_data(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Dropping unserializable {} event: {}", event_type, e);
            None
        }
    }
}

/// Streams a subscription's events until it closes or a terminal event was
/// sent
///
/// `guard` is dropped together with the stream.
pub fn event_stream<G, F>(
    subscription: Subscription<StreamEvent>,
    guard: G,
    render: F,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    G: Send + 'static,
    F: Fn(&StreamEvent) -> Option<Event> + Send + 'static,
{
    stream::unfold(
        Some((subscription, guard, render)),
        |state| async move {
            let (mut subscription, guard, render) = state?;
            loop {
                let event = subscription.recv().await?;
                let Some(frame) = render(&event) else {
                    continue;
                };
                let next = if event.is_terminal() {
                    None
                } else {
                    Some((subscription, guard, render))
                };
                return Some((Ok(frame), next));
            }
        },
    )
}
