//! Session management routes.

use crate::routes::engine_error_response;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use patchbay_types::{SessionSummary, SpawnSpec};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(serde::Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub active_count: usize,
}

/// List live sessions, oldest first. Consumers use this to reconcile
/// their view after a reconnect.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<SessionListResponse> {
    let sessions = state.engine.list_active();
    let active_count = sessions.len();
    Json(SessionListResponse {
        sessions,
        active_count,
    })
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<SpawnSpec>,
) -> Result<(StatusCode, Json<SessionSummary>), (StatusCode, String)> {
    let summary = state
        .engine
        .create(spec)
        .await
        .map_err(engine_error_response)?;
    info!(
        target: "patchbay::api",
        "created session {} ('{}')",
        summary.id,
        summary.command
    );
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, (StatusCode, String)> {
    state
        .engine
        .get_summary(id)
        .map(Json)
        .map_err(engine_error_response)
}

/// Close a session. Idempotent: closing an unknown or already-closed
/// id succeeds.
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .close(id)
        .await
        .map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct InputRequest {
    pub data: String,
}

pub async fn send_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<InputRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .write(id, req.data.as_bytes())
        .map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResizeRequest {
    pub rows: u16,
    pub cols: u16,
}

pub async fn resize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResizeRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .resize(id, req.rows, req.cols)
        .map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.engine.pause(id).map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.engine.resume(id).map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ConsumedRequest {
    pub bytes: u64,
}

/// Backpressure acknowledgement for consumers that stream over HTTP
/// rather than the WebSocket (the socket carries its own `consumed`
/// message).
pub async fn consumed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConsumedRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .report_consumed(id, req.bytes)
        .map_err(engine_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
