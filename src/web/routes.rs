use axum::{
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::ws::ws_handler;
use crate::engine::NegotiationEngine;
use crate::state::AppState;

/// Create the main application router
pub fn create_router<E: NegotiationEngine>(state: Arc<AppState<E>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Signaling endpoint, one WebSocket per peer
        .route("/ws", any(ws_handler::<E>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
