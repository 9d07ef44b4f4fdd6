//! HTTP surface (§6): the conversation lifecycle endpoints plus the SSE
//! stream. Mounted by [`crate::main`] behind CORS and request tracing.

pub mod conversations;
pub mod stream;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/conversations/new", post(conversations::new_conversation))
        .route("/conversation/:id/chat", post(conversations::chat))
        .route("/conversation/:id/cancel", post(conversations::cancel))
        .route("/conversation/:id", get(conversations::get_conversation))
        .route("/conversation/:id/stream", get(stream::stream))
        .with_state(state)
}
