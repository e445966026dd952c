//! WebSocket route handlers.

use crate::global_ws::handle_global_websocket;
use crate::state::AppState;
use crate::websocket::handle_websocket;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state, session_id))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, session_id: Uuid) {
    if let Err(e) = handle_websocket(socket, state, session_id).await {
        tracing::error!(target: "patchbay::ws", "WebSocket error for session {}: {}", session_id, e);
    }
}

pub async fn upgrade_global(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_global_websocket(socket, state).await {
            tracing::error!(target: "patchbay::ws", "Global WebSocket error: {}", e);
        }
    })
}
