pub mod alerts;
pub mod auth;
pub mod chat;
pub mod error;
pub mod sessions;
pub mod system;
pub mod trace;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Build the full API router with its layers.
pub fn router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        // Alerts
        .route("/api/v1/alerts", post(alerts::submit_alert))
        // Sessions
        .route("/api/v1/sessions", get(sessions::list_sessions))
        .route("/api/v1/sessions/active", get(sessions::active_sessions))
        .route(
            "/api/v1/sessions/filter-options",
            get(sessions::filter_options),
        )
        .route("/api/v1/sessions/:id", get(sessions::get_session))
        .route("/api/v1/sessions/:id/summary", get(sessions::session_summary))
        .route(
            "/api/v1/sessions/:id/timeline",
            get(sessions::session_timeline),
        )
        .route("/api/v1/sessions/:id/cancel", post(sessions::cancel_session))
        // Chat
        .route(
            "/api/v1/sessions/:id/chat/messages",
            post(chat::post_chat_message),
        )
        .route("/api/v1/sessions/:id/chat", get(chat::get_chat))
        // Trace (read-only observability)
        .route("/api/v1/sessions/:id/trace", get(trace::session_trace))
        .route("/api/v1/trace/llm/:id", get(trace::llm_interaction))
        .route("/api/v1/trace/mcp/:id", get(trace::mcp_interaction))
        // System
        .route("/api/v1/alert-types", get(sessions::alert_types))
        .route("/api/v1/runbooks", get(system::runbooks))
        .route("/api/v1/system/warnings", get(system::system_warnings))
        .route("/api/v1/system/mcp-servers", get(system::mcp_servers))
        .route("/api/v1/system/default-tools", get(system::default_tools))
        // WebSocket
        .route("/api/v1/ws", get(ws::ws_upgrade))
        // Health probe
        .route("/health", get(system::health));

    api.layer(middleware::from_fn(security_headers))
        .layer(DefaultBodyLimit::max(state.config.server.body_limit))
        .layer(build_cors_layer(&state.config.server.allowed_origins()))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            state.config.server.max_concurrent_requests,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Security headers on every response.
async fn security_headers(request: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    response
}

/// CORS from the same origin set the WebSocket check uses. Entries
/// ending in `:*` become a predicate matching any digits-only port.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin = origin.to_str().unwrap_or("");
            // Digits-only remainder prevents prefix bypass
            // (e.g. "http://localhost:3000.evil.com").
            wildcard_prefixes.iter().any(|prefix| {
                origin
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
