//! Server-Sent Events stream of run events.
//!
//! Every subscriber gets the full event stream from the moment it connects.
//! The broadcast channel drops events for lagged consumers; clients recover
//! by requesting `/api/branches/:id/state`, which replays an authoritative
//! [`hookline_engine::RunEvent::StateSync`] snapshot.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::AppState;

/// SSE endpoint handler: `/api/events`.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("SSE subscriber connected");
    let rx = state.coordinator.emitter().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize run event");
                    None
                }
            },
            // Lagged: skip, the client resyncs via the state endpoint.
            Err(e) => {
                tracing::warn!(error = %e, "SSE subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
