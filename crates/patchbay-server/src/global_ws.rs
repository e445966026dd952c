//! Global WebSocket carrying engine-wide lifecycle events.
//!
//! Dashboards subscribe here once to track sessions starting, exiting,
//! and failing to spawn, instead of polling the list endpoint.

use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn handle_global_websocket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut event_rx = state.engine.subscribe_global();

    tracing::info!(target: "patchbay::ws", "global events client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(dropped)) => {
                    tracing::warn!(
                        target: "patchbay::ws",
                        "global events client lagged, {} event(s) dropped",
                        dropped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // The client side only carries keepalives and the close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Ping(_) => {
                    tracing::trace!(target: "patchbay::ws::ping", "ping from global events client");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(target: "patchbay::ws", "global events client disconnected");
    Ok(())
}
