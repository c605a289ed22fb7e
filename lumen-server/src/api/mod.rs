//! HTTP and WebSocket routes.

pub mod generate;
pub mod types;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

pub use generate::AppState;

/// All routes, open to any origin so browser frontends can reach them.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/images/generate-ws", get(generate::generate_ws))
        .route("/v1/engines", get(generate::list_engines))
        .route("/lumen/v1/health", get(generate::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
