//! Read-only observability endpoints over the interaction records.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::error::error_response;
use crate::state::AppState;

/// GET /api/v1/sessions/:id/trace — every LLM and MCP interaction of a
/// session, interleaved by time.
pub async fn session_trace(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id).await {
        return error_response(e);
    }
    let llm = match state.store.list_llm_interactions(&id).await {
        Ok(llm) => llm,
        Err(e) => return error_response(e),
    };
    let mcp = match state.store.list_mcp_interactions(&id).await {
        Ok(mcp) => mcp,
        Err(e) => return error_response(e),
    };

    Json(serde_json::json!({
        "session_id": id,
        "llm_interactions": llm,
        "mcp_interactions": mcp,
    }))
    .into_response()
}

/// GET /api/v1/trace/llm/:id — one full LLM interaction record.
pub async fn llm_interaction(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_llm_interaction(&id).await {
        Ok(interaction) => Json(interaction).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/trace/mcp/:id — one full MCP interaction record.
pub async fn mcp_interaction(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_mcp_interaction(&id).await {
        Ok(interaction) => Json(interaction).into_response(),
        Err(e) => error_response(e),
    }
}
