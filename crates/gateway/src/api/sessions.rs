//! Session read endpoints and cancel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tarsy_domain::event::SessionEvent;
use tarsy_domain::status::SessionStatus;
use tarsy_domain::{Error, Result};
use tarsy_store::{SessionFilter, SessionSortBy, SortOrder};

use super::error::{api_error, error_response};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listing query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated status list.
    pub status: Option<String>,
    pub alert_type: Option<String>,
    pub chain_id: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListQuery {
    /// Strict parse: any invalid enum or date is a 400 naming the value.
    pub fn into_filter(self) -> Result<SessionFilter> {
        let mut filter = SessionFilter::default();

        if let Some(raw) = self.status {
            for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                filter.status.push(part.parse::<SessionStatus>()?);
            }
        }
        filter.alert_type = self.alert_type.filter(|s| !s.is_empty());
        filter.chain_id = self.chain_id.filter(|s| !s.is_empty());

        if let Some(search) = self.search.filter(|s| !s.is_empty()) {
            if search.chars().count() < 3 {
                return Err(Error::validation(
                    "search",
                    "search requires at least 3 characters",
                ));
            }
            filter.search = Some(search);
        }

        filter.start_date = parse_date("start_date", self.start_date)?;
        filter.end_date = parse_date("end_date", self.end_date)?;
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(Error::validation("start_date", "start_date is after end_date"));
            }
        }

        if let Some(raw) = self.sort_by {
            filter.sort_by = raw.parse::<SessionSortBy>()?;
        }
        if let Some(raw) = self.sort_order {
            filter.sort_order = raw.parse::<SortOrder>()?;
        }
        filter.page = self.page.unwrap_or(1).max(1);
        filter.page_size = self.page_size.unwrap_or(20).clamp(1, 100);

        Ok(filter)
    }
}

fn parse_date(field: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|_| Error::validation(field, format!("invalid RFC3339 timestamp: {raw}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return error_response(e),
    };

    match state.store.list_sessions(&filter).await {
        Ok((sessions, total)) => Json(serde_json::json!({
            "sessions": sessions,
            "total": total,
            "page": filter.page,
            "page_size": filter.page_size,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions/active
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn active_sessions(State(state): State<AppState>) -> Response {
    match state.store.active_sessions().await {
        Ok(sessions) => Json(serde_json::json!({
            "sessions": sessions,
            "count": sessions.len(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session detail: the row plus its stage/execution tree, built by
/// explicit joins.
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.store.get_session(&id).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let stages = match state.store.list_stages(&id).await {
        Ok(stages) => stages,
        Err(e) => return error_response(e),
    };

    let mut stage_views = Vec::with_capacity(stages.len());
    for stage in stages {
        let executions = match state.store.list_executions(&stage.id).await {
            Ok(executions) => executions,
            Err(e) => return error_response(e),
        };
        stage_views.push(serde_json::json!({
            "stage": stage,
            "executions": executions,
        }));
    }

    Json(serde_json::json!({
        "session": session,
        "stages": stage_views,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions/:id/summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_summary(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.store.get_session(&id).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    match state.store.session_summary(&id).await {
        Ok(summary) => Json(serde_json::json!({
            "session_id": session.id,
            "status": session.status,
            "alert_type": session.alert_type,
            "executive_summary": session.executive_summary,
            "final_analysis": session.final_analysis,
            "counts": summary,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions/:id/timeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_timeline(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id).await {
        return error_response(e);
    }
    match state.store.list_timeline(&id).await {
        Ok(events) => Json(serde_json::json!({
            "session_id": id,
            "events": events,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sessions/filter-options, /api/v1/alert-types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn filter_options(State(state): State<AppState>) -> Response {
    match state.store.filter_options().await {
        Ok(options) => Json(options).into_response(),
        Err(e) => error_response(e),
    }
}

/// Alert types with a configured chain (what the submit endpoint will
/// accept without falling back to the default chain).
pub async fn alert_types(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "alert_types": state.chains.alert_types() })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/sessions/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cancel can land on any replica, so three paths are tried and the
/// call succeeds if any did:
/// 1. the DB transition (visible to whichever pod owns the work),
/// 2. this pod's local worker context,
/// 3. this pod's in-flight chat execution.
pub async fn cancel_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let db_result = state.store.cancel_if_cancellable(&id).await;
    let local_cancelled = state.worker_pool.cancel_session(&id);
    let chat_cancelled = state.chat.cancel_by_session(&id);

    match db_result {
        Ok(status) => {
            state
                .publisher
                .publish(SessionEvent::session_status(&id, status));
            tracing::info!(
                session_id = %id,
                status = %status,
                local_cancelled,
                chat_cancelled,
                "cancel accepted"
            );
            Json(serde_json::json!({
                "session_id": id,
                "status": status,
            }))
            .into_response()
        }
        Err(Error::NotFound) => error_response(Error::NotFound),
        Err(Error::NotCancellable) if local_cancelled || chat_cancelled => {
            // The session row is terminal but local work (a chat
            // response, typically) was still running and got cancelled.
            Json(serde_json::json!({
                "session_id": id,
                "cancelled_local_work": true,
            }))
            .into_response()
        }
        Err(Error::NotCancellable) => {
            api_error(StatusCode::CONFLICT, Error::NotCancellable.to_string())
        }
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_list_parses_comma_separated() {
        let query = ListQuery {
            status: Some("completed,failed".into()),
            ..ListQuery::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(
            filter.status,
            vec![SessionStatus::Completed, SessionStatus::Failed]
        );
    }

    #[test]
    fn bogus_status_in_list_is_named() {
        let query = ListQuery {
            status: Some("completed,bogus".into()),
            ..ListQuery::default()
        };
        let err = query.into_filter().unwrap_err();
        assert!(err.to_string().contains("invalid status: bogus"));
    }

    #[test]
    fn unknown_sort_field_rejected() {
        let query = ListQuery {
            sort_by: Some("unknown_field".into()),
            ..ListQuery::default()
        };
        assert!(query.into_filter().is_err());
    }

    #[test]
    fn short_search_rejected() {
        let query = ListQuery {
            search: Some("ab".into()),
            ..ListQuery::default()
        };
        let err = query.into_filter().unwrap_err();
        assert!(err.to_string().contains("at least 3 characters"));
    }

    #[test]
    fn invalid_date_rejected() {
        let query = ListQuery {
            start_date: Some("yesterday".into()),
            ..ListQuery::default()
        };
        assert!(query.into_filter().is_err());
    }

    #[test]
    fn inverted_date_range_rejected() {
        let query = ListQuery {
            start_date: Some("2026-08-01T00:00:00Z".into()),
            end_date: Some("2026-07-01T00:00:00Z".into()),
            ..ListQuery::default()
        };
        assert!(query.into_filter().is_err());
    }

    #[test]
    fn page_size_is_clamped() {
        let query = ListQuery {
            page_size: Some(10_000),
            ..ListQuery::default()
        };
        assert_eq!(query.into_filter().unwrap().page_size, 100);
    }
}
