//! Image generation endpoints.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use tokio::sync::watch;

use lumen_backend_cpu::CpuBackend;
use lumen_core::ModelConfig;
use lumen_runtime::{Pipeline, PipelinePool};

use crate::config::SessionConfig;
use crate::session;

use super::types::EngineInfo;

/// Shared application state passed to handlers.
pub struct AppState {
    pub engine_id: String,
    pub model: ModelConfig,
    pub pool: PipelinePool<Pipeline<CpuBackend>>,
    pub session: SessionConfig,
    /// Flips to true when the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

/// GET /images/generate-ws
pub async fn generate_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::run(socket, state))
}

/// GET /v1/engines
pub async fn list_engines(State(state): State<Arc<AppState>>) -> Json<Vec<EngineInfo>> {
    Json(vec![EngineInfo::picture(&state.engine_id, &state.model.name)])
}

/// GET /lumen/v1/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
