//! Alert submission — `POST /api/v1/alerts`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tarsy_domain::event::SessionEvent;
use tarsy_store::NewSession;

use super::auth::extract_author;
use super::error::{api_error, error_response};
use crate::state::AppState;

/// Hard cap on the alert payload itself; the whole request body is
/// separately capped at the server-wide limit.
pub const MAX_ALERT_DATA: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub alert_type: String,
    #[serde(default)]
    pub runbook: Option<String>,
    #[serde(default)]
    pub data: String,
    /// MCP server selection override.
    #[serde(default)]
    pub mcp: Option<Vec<String>>,
    #[serde(default)]
    pub slack_message_fingerprint: Option<String>,
}

pub async fn submit_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AlertRequest>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down");
    }
    if let Some((status, message)) = validate_alert(&body) {
        return api_error(status, message);
    }

    // Chain resolution happens at submit so a config change mid-flight
    // never reroutes an accepted alert.
    let Some(chain) = state.chains.resolve(&body.alert_type) else {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("no chain configured for alert type \"{}\"", body.alert_type),
        );
    };

    // Alert masking is fail-open: the payload always gets through.
    let alert_data = state.masker.mask_alert_payload(&body.data);
    let author = extract_author(&headers);

    let session = match state
        .store
        .insert_session(NewSession {
            alert_type: body.alert_type.clone(),
            alert_data,
            chain_id: chain.id.clone(),
            author,
            runbook: body.runbook,
            mcp_selection: body.mcp,
            slack_message_fingerprint: body.slack_message_fingerprint,
        })
        .await
    {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    state.publisher.publish(SessionEvent::session_created(
        &session.id,
        &session.alert_type,
        &session.chain_id,
    ));
    // Wake the dispatcher instead of waiting for the next poll tick.
    state.worker_pool.notify();

    tracing::info!(
        session_id = %session.id,
        alert_type = %session.alert_type,
        chain_id = %session.chain_id,
        "alert accepted"
    );

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "session_id": session.id,
            "status": "queued",
            "message": "alert accepted for investigation",
        })),
    )
        .into_response()
}

fn validate_alert(body: &AlertRequest) -> Option<(StatusCode, String)> {
    if body.alert_type.trim().is_empty() {
        return Some((StatusCode::BAD_REQUEST, "alert_type field is required".into()));
    }
    if body.data.is_empty() {
        return Some((StatusCode::BAD_REQUEST, "data field is required".into()));
    }
    if body.data.len() > MAX_ALERT_DATA {
        return Some((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("data exceeds {MAX_ALERT_DATA} bytes"),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(data: String) -> AlertRequest {
        AlertRequest {
            alert_type: "KubernetesPodOOM".into(),
            runbook: None,
            data,
            mcp: None,
            slack_message_fingerprint: None,
        }
    }

    #[test]
    fn empty_data_is_a_400_naming_the_field() {
        let (status, message) = validate_alert(&request(String::new())).unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("data field is required"));
    }

    #[test]
    fn data_at_the_cap_is_accepted() {
        assert!(validate_alert(&request("x".repeat(MAX_ALERT_DATA))).is_none());
    }

    #[test]
    fn data_over_the_cap_is_413() {
        let (status, _) = validate_alert(&request("x".repeat(MAX_ALERT_DATA + 1))).unwrap();
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
