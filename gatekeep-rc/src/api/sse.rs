//! Server-Sent Events endpoint

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /api/events
///
/// Streams every gate status event emitted after the client connects.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    gatekeep_common::sse::create_event_sse_stream(&state.events, "gatekeep-rc")
}
