//! Health and system introspection endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::runtime::PoolCondition;
use crate::state::AppState;

/// GET /health — liveness + component snapshot.
///
/// 503 when the database does not answer; `degraded` when the MCP layer
/// or the worker pool is limping but the service can still take alerts.
pub async fn health(State(state): State<AppState>) -> Response {
    let database_ok = state.store.ping().await.is_ok();
    if !database_ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "version": env!("CARGO_PKG_VERSION"),
                "database": "unreachable",
            })),
        )
            .into_response();
    }

    let pool = state.worker_pool.health().await;
    let mcp = state.mcp.health();

    let status = if pool.condition == PoolCondition::Unhealthy {
        "unhealthy"
    } else if pool.condition == PoolCondition::Degraded || !mcp.healthy {
        "degraded"
    } else {
        "healthy"
    };

    let warnings: Vec<String> = state
        .config_issues
        .iter()
        .map(|issue| issue.to_string())
        .collect();

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "database": "ok",
        "worker_pool": pool,
        "mcp_health": mcp,
        "warnings": warnings,
        "configuration": state.config.summary(),
        "event_backlog": state.publisher.backlog(),
        "dropped_events": state.publisher.dropped_count(),
        "ws_connections": state.connections.connection_count(),
    }))
    .into_response()
}

/// GET /api/v1/system/warnings — configuration issues found at startup.
pub async fn system_warnings(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "warnings": &*state.config_issues })).into_response()
}

/// GET /api/v1/system/mcp-servers — configured servers + health.
pub async fn mcp_servers(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "servers": state.config.mcp.servers,
        "health": state.mcp.health(),
    }))
    .into_response()
}

/// GET /api/v1/system/default-tools — the default MCP tool set offered
/// to agents with no explicit selection.
pub async fn default_tools(State(state): State<AppState>) -> Response {
    let default_ids = state.config.mcp.default_server_ids();
    let tools = state.mcp.list_tools(Some(default_ids.as_slice())).await;
    Json(serde_json::json!({
        "servers": default_ids,
        "tools": tools,
    }))
    .into_response()
}

/// GET /api/v1/runbooks — the configured runbook catalogue.
pub async fn runbooks(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "runbooks": state.config.runbooks })).into_response()
}
