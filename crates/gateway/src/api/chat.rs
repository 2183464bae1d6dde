//! Chat endpoints — `POST /api/v1/sessions/:id/chat/messages`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::auth::extract_author;
use super::error::{api_error, error_response};
use crate::state::AppState;

/// Upper bound on a single chat message.
pub const MAX_CHAT_CONTENT: usize = 100_000;

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    #[serde(default)]
    pub content: String,
}

pub async fn post_chat_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatMessageRequest>,
) -> Response {
    if body.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "content field is required");
    }
    if body.content.len() > MAX_CHAT_CONTENT {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("content exceeds {MAX_CHAT_CONTENT} characters"),
        );
    }

    let author = extract_author(&headers);
    match state.chat.submit(&session_id, &body.content, &author).await {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/sessions/:id/chat — the chat record with its messages.
pub async fn get_chat(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&session_id).await {
        return error_response(e);
    }
    let chat = match state.store.get_chat(&session_id).await {
        Ok(chat) => chat,
        Err(e) => return error_response(e),
    };
    match state.store.list_chat_messages(&chat.id).await {
        Ok(messages) => Json(serde_json::json!({
            "chat": chat,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
