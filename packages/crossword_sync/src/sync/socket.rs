//! Duplex socket connections.
//!
//! A socket connects once, then joins a topic with `join_session`. Until it
//! joins it is not in any registry and receives nothing.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hints::Revealer;

use super::SyncHub;
use super::protocol::{ClientMessage, SyncEvent};
use super::store::CellWrite;

/// Handle one socket until it closes.
pub async fn handle_socket(
    socket: WebSocket,
    hub: SyncHub,
    revealer: Arc<Revealer>,
    buffer: usize,
) {
    debug!("New sync socket");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Frames queued by the registry; drained by the sender task
    let (tx, mut rx) = mpsc::channel::<String>(buffer.max(2));

    // Registry id of the current subscription, if any
    let joined: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let sender_task = async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    };

    let hub_input = hub.clone();
    let joined_input = joined.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Socket receive error: {}", e);
                    break;
                }
            };

            let client_msg = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Ignoring malformed socket message: {}", e);
                    continue;
                }
            };

            match client_msg {
                ClientMessage::JoinSession { session_id } => {
                    join(&hub_input, &joined_input, &session_id, tx.clone()).await;
                }
                ClientMessage::UpdateCell { r, c, value } => {
                    let current = joined_input.lock().clone();
                    let Some(client_id) = current else {
                        warn!("update_cell before join_session");
                        continue;
                    };
                    let Some(session_id) = hub_input.sockets.session_of(&client_id) else {
                        debug!(client_id = %client_id, "update_cell from a dropped subscription");
                        continue;
                    };
                    match hub_input
                        .sessions
                        .apply_cell(&session_id, r, c, &value, Some(&client_id))
                        .await
                    {
                        Ok(CellWrite::Stored) => {
                            if let Err(e) = revealer.refresh_completion(&session_id).await {
                                warn!(
                                    session_id = %session_id,
                                    "Failed to refresh completion: {:#}",
                                    e
                                );
                            }
                        }
                        Ok(CellWrite::OutOfRange) => warn!(
                            session_id = %session_id,
                            r,
                            c,
                            "Ignoring update_cell outside the grid"
                        ),
                        Ok(CellWrite::UnknownSession) => debug!(
                            session_id = %session_id,
                            "update_cell on a topic with no session"
                        ),
                        Err(e) => {
                            warn!(session_id = %session_id, "Failed to apply cell: {:#}", e)
                        }
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Socket sender task ended"),
        _ = input_task => debug!("Socket input task ended"),
    }

    let last = joined.lock().take();
    if let Some(client_id) = last {
        hub.sockets.remove(&client_id);
    }
    debug!("Sync socket closed");
}

/// Move the connection onto `session_id`'s topic and greet it.
async fn join(
    hub: &SyncHub,
    joined: &Mutex<Option<String>>,
    session_id: &str,
    tx: mpsc::Sender<String>,
) {
    let previous = joined.lock().take();
    if let Some(prev) = previous {
        hub.sockets.remove(&prev);
    }

    let Some(client_id) = hub.sockets.add_greeted(session_id, tx) else {
        debug!(session_id, "socket closed before joining");
        return;
    };
    *joined.lock() = Some(client_id.clone());
    info!(client_id = %client_id, session_id, "socket joined");

    // Admin topics are not sessions and get no snapshot.
    match hub.sessions.snapshot(session_id).await {
        Ok(Some(state)) => {
            hub.sockets
                .send_to_one(&client_id, &SyncEvent::PuzzleUpdated { state });
        }
        Ok(None) => debug!(session_id, "joined a topic with no session"),
        Err(e) => warn!(session_id, "Failed to load snapshot: {:#}", e),
    }
}
