//! HTTP route handlers.

pub mod sessions;
pub mod ws;

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use patchbay_core::EngineError;
use patchbay_types::MetricsSnapshot;
use serde::Serialize;
use std::sync::Arc;

/// Build the full application router. Shared by main.rs and the
/// integration tests.
pub fn app_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/sessions", get(sessions::list))
        .route("/sessions", post(sessions::create))
        .route("/sessions/{id}", get(sessions::get))
        .route("/sessions/{id}", delete(sessions::close))
        .route("/sessions/{id}/input", post(sessions::send_input))
        .route("/sessions/{id}/resize", post(sessions::resize))
        .route("/sessions/{id}/pause", post(sessions::pause))
        .route("/sessions/{id}/resume", post(sessions::resume))
        .route("/sessions/{id}/consumed", post(sessions::consumed))
        .route("/metrics", get(metrics))
        .route("/health", get(health));

    let ws_routes = Router::new()
        .route("/sessions/{id}", get(ws::upgrade))
        .route("/events", get(ws::upgrade_global));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .with_state(state)
}

/// Map an engine error to the HTTP status its taxonomy calls for.
pub(crate) fn engine_error_response(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidDimensions { .. } => StatusCode::BAD_REQUEST,
        EngineError::SessionClosing(_) => StatusCode::CONFLICT,
        EngineError::SpawnFailed { .. } => StatusCode::BAD_GATEWAY,
        EngineError::PtyError(_) | EngineError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics())
}
