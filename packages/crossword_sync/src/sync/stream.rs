//! Push-stream (server-sent events) subscriptions.
//!
//! The stream registry already encodes every frame as an [`Event`], so the
//! response is just the client's queue drained in order.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::debug;

use super::SyncHub;
use super::protocol::SyncEvent;
use super::registry::StreamRegistry;

/// Deregisters the client as soon as the response body is dropped, which is
/// what hyper does when the peer goes away.
struct StreamGuard {
    registry: Arc<StreamRegistry>,
    client_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.client_id) {
            debug!(client_id = %self.client_id, "stream closed by client");
        }
    }
}

/// Register a stream client for `session_id` and build its response.
///
/// The first frames are `connection_established` and a `puzzle_updated`
/// snapshot; every write persisted after that snapshot follows as a live
/// event. Returns `None` if the session does not exist.
pub async fn open_stream(
    hub: &SyncHub,
    session_id: &str,
    buffer: usize,
) -> Result<Option<Response>> {
    // Room for the two greeting frames regardless of configuration.
    let (tx, rx) = mpsc::channel::<Event>(buffer.max(2));

    let subscribed = hub
        .sessions
        .subscribe_with_snapshot(session_id, |state| {
            let client_id = hub.streams.add_greeted(session_id, tx)?;
            hub.streams
                .send_to_one(&client_id, &SyncEvent::PuzzleUpdated { state });
            Some(client_id)
        })
        .await?;
    let Some(client_id) = subscribed else {
        return Ok(None);
    };
    let client_id = client_id.context("push stream closed before its greeting")?;

    let guard = StreamGuard {
        registry: hub.streams.clone(),
        client_id,
    };
    let events = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event), (rx, guard)))
    });

    // No keep-alive here: the registry heartbeat writes the comment frames and
    // reaps streams that stop accepting them.
    Ok(Some(Sse::new(events).into_response()))
}
