use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::sync;

/// Duplex socket. One connection per client; topics are joined in-band.
pub async fn sync_socket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.sync.clone();
    let revealer = state.revealer.clone();
    let buffer = state.sync_config.client_buffer;

    ws.on_upgrade(move |socket| sync::socket::handle_socket(socket, hub, revealer, buffer))
}

/// Push stream for one session.
pub async fn session_events_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Response> {
    sync::stream::open_stream(&state.sync, &session_id, state.sync_config.client_buffer)
        .await?
        .ok_or_else(|| AppError::not_found("session not found"))
}
