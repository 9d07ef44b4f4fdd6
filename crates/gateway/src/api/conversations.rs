//! `POST /conversations/new`, `POST /conversation/{id}/chat`,
//! `POST /conversation/{id}/cancel`, `GET /conversation/{id}` (§6).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use ac_domain::error::Error;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewConversationRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn new_conversation(
    State(state): State<AppState>,
    Json(body): Json<NewConversationRequest>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    let Some(model) = body.model.or_else(|| state.default_model()) else {
        return bad_request("no model specified and no default model is configured");
    };

    let id = Uuid::new_v4();
    if let Err(e) = state.store.create_conversation(id, body.cwd, None) {
        return store_error(e);
    }

    let manager = match state.registry.get_or_create(id) {
        Ok(m) => m,
        Err(e) => return store_error(e),
    };
    if let Err(e) = manager.accept_user_message(&model, body.message) {
        return model_error(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "accepted", "conversation_id": id })),
    )
        .into_response()
}

pub async fn chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }
    let manager = match state.registry.get_or_create(id) {
        Ok(m) => m,
        Err(e) => return store_error(e),
    };
    let model = match body.model.or_else(|| manager.get_model()).or_else(|| state.default_model()) {
        Some(m) => m,
        None => return bad_request("no model specified and no default model is configured"),
    };
    if let Err(e) = manager.accept_user_message(&model, body.message) {
        return model_error(e);
    }

    (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "accepted" }))).into_response()
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(manager) = state.registry.get(id) else {
        return (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "no_active_conversation" })),
        )
            .into_response();
    };
    if !manager.is_working() {
        return (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "no_active_conversation" })),
        )
            .into_response();
    }
    if let Err(e) = manager.cancel().await {
        return store_error(e);
    }
    (StatusCode::OK, Json(serde_json::json!({ "status": "cancelled" }))).into_response()
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let conversation = match state.store.get_conversation(id) {
        Ok(c) => c,
        Err(e) => return store_error(e),
    };
    let messages = match state.store.list(id) {
        Ok(m) => m,
        Err(e) => return store_error(e),
    };
    let context_window_size = messages
        .last()
        .map(|m| m.usage.context_window_used())
        .filter(|&n| n > 0);

    Json(serde_json::json!({
        "messages": messages,
        "conversation": conversation,
        "context_window_size": context_window_size,
    }))
    .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn store_error(e: Error) -> axum::response::Response {
    match e {
        Error::UnknownConversation(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn model_error(e: Error) -> axum::response::Response {
    match e {
        Error::ConversationModelMismatch { .. } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        other => store_error(other),
    }
}
