//! Per-session WebSocket connection handling.
//!
//! One socket streams one session: buffered scrollback is replayed
//! first, then live frames, ending with the terminal `exit`. The
//! client side of the socket carries input, resize, backpressure
//! acknowledgements, and pause/resume.

use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use patchbay_core::Subscription;
use patchbay_types::{SessionEvent, WsClientMessage, WsServerMessage};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Maximum size for one terminal input message (generous for paste
/// operations).
const MAX_INPUT_SIZE: usize = 64 * 1024;

pub async fn handle_websocket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    session_id: Uuid,
) -> Result<()> {
    // Subscribe before splitting; an unknown session gets one error
    // frame and a clean close.
    let Subscription { replay, mut receiver } = match state.engine.subscribe(session_id) {
        Ok(sub) => sub,
        Err(e) => {
            let msg = WsServerMessage::Error {
                message: e.to_string(),
            };
            let _ = socket
                .send(Message::Text(serde_json::to_string(&msg)?.into()))
                .await;
            let _ = socket.send(Message::Close(None)).await;
            return Ok(());
        }
    };

    info!(target: "patchbay::ws", "client connected to session {}", session_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Replay goes out first, before any live frame. Replayed bytes are
    // not subject to consumed accounting.
    let replay_msg = WsServerMessage::Replay {
        start_seq: replay.start_seq,
        next_seq: replay.next_seq,
        text: replay.text,
    };
    ws_tx
        .send(Message::Text(serde_json::to_string(&replay_msg)?.into()))
        .await?;

    // Channel for recv_task to send replies (pong, per-message errors)
    // without contending for the sink.
    let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::channel::<WsServerMessage>(32);

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = outgoing_rx.recv() => {
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                event = receiver.recv() => {
                    match event {
                        Ok(event) => {
                            let is_exit = matches!(event, SessionEvent::Exit);
                            let msg = WsServerMessage::from(event);
                            let Ok(json) = serde_json::to_string(&msg) else { continue };
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                debug!(
                                    target: "patchbay::ws",
                                    "send failed for session {}", session_id
                                );
                                break;
                            }
                            if is_exit {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(dropped)) => {
                            // A subscriber that cannot keep up loses
                            // frames rather than blocking the reader;
                            // tell it so it can resubscribe for a
                            // fresh replay.
                            warn!(
                                target: "patchbay::ws",
                                "session {} subscriber lagged, {} frame(s) dropped",
                                session_id,
                                dropped
                            );
                            let msg = WsServerMessage::Error {
                                message: format!("{dropped} frame(s) dropped; resubscribe to resync"),
                            };
                            let Ok(json) = serde_json::to_string(&msg) else { continue };
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let parsed: WsClientMessage = match serde_json::from_str(&text) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            let _ = outgoing_tx
                                .send(WsServerMessage::Error {
                                    message: format!("invalid message: {e}"),
                                })
                                .await;
                            continue;
                        }
                    };
                    if let Some(reply) =
                        handle_client_message(&recv_state, session_id, parsed)
                    {
                        if outgoing_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => {
                    debug!(target: "patchbay::ws", "client closed session {} socket", session_id);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(target: "patchbay::ws", "client disconnected from session {}", session_id);
    Ok(())
}

/// Apply one client message to the engine. Returns a frame to send
/// back when the message warrants one.
fn handle_client_message(
    state: &AppState,
    session_id: Uuid,
    msg: WsClientMessage,
) -> Option<WsServerMessage> {
    match msg {
        WsClientMessage::Input { data } => {
            if data.len() > MAX_INPUT_SIZE {
                return Some(WsServerMessage::Error {
                    message: format!("input exceeds {MAX_INPUT_SIZE} bytes"),
                });
            }
            match state.engine.write(session_id, data.as_bytes()) {
                Ok(()) => None,
                Err(e) => Some(WsServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }
        WsClientMessage::Resize { rows, cols } => {
            match state.engine.resize(session_id, rows, cols) {
                Ok(()) => None,
                Err(e) => Some(WsServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }
        WsClientMessage::Consumed { bytes } => {
            // A late ack for a session that already exited is fine.
            let _ = state.engine.report_consumed(session_id, bytes);
            None
        }
        WsClientMessage::Pause => match state.engine.pause(session_id) {
            Ok(()) => None,
            Err(e) => Some(WsServerMessage::Error {
                message: e.to_string(),
            }),
        },
        WsClientMessage::Resume => match state.engine.resume(session_id) {
            Ok(()) => None,
            Err(e) => Some(WsServerMessage::Error {
                message: e.to_string(),
            }),
        },
        WsClientMessage::Ping { timestamp } => {
            trace!(target: "patchbay::ws::ping", "ping from session {} client", session_id);
            Some(WsServerMessage::Pong { timestamp })
        }
    }
}
