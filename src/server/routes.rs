use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use super::handler::{health, list_flows, stream_chat};
use super::state::AppState;

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.server.max_body_bytes;

    Router::new()
        .route("/api/stream-chat", post(stream_chat))
        .route("/api/flows", get(list_flows))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
