//! Server-Sent Events rendering of a [`ClientChannel`].

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use crate::live::hub::{ClientChannel, LiveEvent};

/// Wire representation of an event.
pub fn to_sse_event(event: &LiveEvent) -> Event {
    let data = match event {
        LiveEvent::Generation {
            generation,
            changed,
        } => json!({ "generation": generation, "changed": changed }),
        LiveEvent::BuildFailed {
            generation,
            message,
        } => json!({ "generation": generation, "message": message }),
    };
    Event::default().event(event.name()).data(data.to_string())
}

/// Stream a client's events as `text/event-stream`.
///
/// The stream opens with a `sync` event carrying the generation being
/// served, so a reconnecting browser can tell whether it missed a rebuild.
pub fn sse_response(channel: ClientChannel, generation: u64, heartbeat: Duration) -> Response {
    let sync = Event::default()
        .event("sync")
        .data(json!({ "generation": generation }).to_string());

    let events = stream::once(async move { sync })
        .chain(channel.into_stream().map(|event| to_sse_event(&event)))
        .map(Ok::<_, Infallible>);

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(heartbeat))
        .into_response()
}
