//! Entity records — plain data with foreign-key ids.
//!
//! Statuses are stored as TEXT and parsed through the domain enums on
//! the way out; relations are ids resolved by explicit joins at read
//! time, never owning pointers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use tarsy_domain::chain::{ParallelType, SuccessPolicy};
use tarsy_domain::status::{EventStatus, SessionStatus, StageStatus};
use tarsy_domain::Error;

/// Parse a TEXT status column through a domain `FromStr`.
fn decode<T>(row: &PgRow, column: &str) -> sqlx::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: Error| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub alert_type: String,
    pub alert_data: String,
    pub chain_id: String,
    pub author: String,
    pub runbook: Option<String>,
    pub mcp_selection: Option<Vec<String>>,
    pub slack_message_fingerprint: Option<String>,
    pub status: SessionStatus,
    pub current_stage_index: Option<i32>,
    pub pod_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_interaction_at: DateTime<Utc>,
    pub final_analysis: Option<String>,
    pub executive_summary: Option<String>,
    pub executive_summary_error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for Session {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            alert_type: row.try_get("alert_type")?,
            alert_data: row.try_get("alert_data")?,
            chain_id: row.try_get("chain_id")?,
            author: row.try_get("author")?,
            runbook: row.try_get("runbook")?,
            mcp_selection: row.try_get("mcp_selection")?,
            slack_message_fingerprint: row.try_get("slack_message_fingerprint")?,
            status: decode(row, "status")?,
            current_stage_index: row.try_get("current_stage_index")?,
            pod_id: row.try_get("pod_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_interaction_at: row.try_get("last_interaction_at")?,
            final_analysis: row.try_get("final_analysis")?,
            executive_summary: row.try_get("executive_summary")?,
            executive_summary_error: row.try_get("executive_summary_error")?,
        })
    }
}

/// Everything `submitAlert` provides.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub alert_type: String,
    pub alert_data: String,
    pub chain_id: String,
    pub author: String,
    pub runbook: Option<String>,
    pub mcp_selection: Option<Vec<String>>,
    pub slack_message_fingerprint: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub stage_index: i32,
    pub expected_agents: i32,
    pub parallel_type: Option<ParallelType>,
    pub success_policy: SuccessPolicy,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub chat_user_message_id: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for Stage {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let parallel_type: Option<String> = row.try_get("parallel_type")?;
        let parallel_type = match parallel_type.as_deref() {
            None => None,
            Some("multi_agent") => Some(ParallelType::MultiAgent),
            Some("replica") => Some(ParallelType::Replica),
            Some(other) => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "parallel_type".into(),
                    source: format!("invalid parallel type: {other}").into(),
                })
            }
        };
        let success_policy: String = row.try_get("success_policy")?;
        let success_policy = match success_policy.as_str() {
            "all" => SuccessPolicy::All,
            "any" => SuccessPolicy::Any,
            other => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "success_policy".into(),
                    source: format!("invalid success policy: {other}").into(),
                })
            }
        };
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            name: row.try_get("name")?,
            stage_index: row.try_get("stage_index")?,
            expected_agents: row.try_get("expected_agents")?,
            parallel_type,
            success_policy,
            status: decode(row, "status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
            chat_user_message_id: row.try_get("chat_user_message_id")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewStage {
    pub session_id: String,
    pub name: String,
    pub stage_index: i32,
    pub expected_agents: i32,
    pub parallel_type: Option<ParallelType>,
    pub success_policy: SuccessPolicy,
    pub chat_user_message_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct AgentExecution {
    pub id: String,
    pub stage_id: String,
    pub session_id: String,
    pub agent_name: String,
    pub agent_index: i32,
    pub parent_execution_id: Option<String>,
    pub status: StageStatus,
    pub llm_backend: String,
    pub task_description: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for AgentExecution {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            stage_id: row.try_get("stage_id")?,
            session_id: row.try_get("session_id")?,
            agent_name: row.try_get("agent_name")?,
            agent_index: row.try_get("agent_index")?,
            parent_execution_id: row.try_get("parent_execution_id")?,
            status: decode(row, "status")?,
            llm_backend: row.try_get("llm_backend")?,
            task_description: row.try_get("task_description")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub stage_id: String,
    pub session_id: String,
    pub agent_name: String,
    pub agent_index: i32,
    pub parent_execution_id: Option<String>,
    pub llm_backend: String,
    pub task_description: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeline event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub id: String,
    pub session_id: String,
    pub execution_id: Option<String>,
    pub sequence_number: i64,
    pub event_type: String,
    pub status: EventStatus,
    pub content: String,
    pub metadata: Value,
    pub llm_interaction_id: Option<String>,
    pub mcp_interaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TimelineEvent {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            execution_id: row.try_get("execution_id")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            status: decode(row, "status")?,
            content: row.try_get("content")?,
            metadata: row.try_get("metadata")?,
            llm_interaction_id: row.try_get("llm_interaction_id")?,
            mcp_interaction_id: row.try_get("mcp_interaction_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub execution_id: String,
    pub sequence_number: i32,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MessageRecord {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            sequence_number: row.try_get("sequence_number")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            tool_calls: row.try_get("tool_calls")?,
            tool_call_id: row.try_get("tool_call_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interactions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct LlmInteraction {
    pub id: String,
    pub session_id: String,
    pub execution_id: String,
    pub backend: String,
    pub model: Option<String>,
    pub request: Value,
    pub response: Value,
    pub latency_ms: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LlmInteraction {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            execution_id: row.try_get("execution_id")?,
            backend: row.try_get("backend")?,
            model: row.try_get("model")?,
            request: row.try_get("request")?,
            response: row.try_get("response")?,
            latency_ms: row.try_get("latency_ms")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McpInteraction {
    pub id: String,
    pub session_id: String,
    pub execution_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub masked: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for McpInteraction {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            execution_id: row.try_get("execution_id")?,
            server_name: row.try_get("server_name")?,
            tool_name: row.try_get("tool_name")?,
            arguments: row.try_get("arguments")?,
            result: row.try_get("result")?,
            latency_ms: row.try_get("latency_ms")?,
            error: row.try_get("error")?,
            masked: row.try_get("masked")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: String,
    pub session_id: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Chat {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            author: row.try_get("author")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatUserMessage {
    pub id: String,
    pub chat_id: String,
    pub sequence_number: i32,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ChatUserMessage {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            sequence_number: row.try_get("sequence_number")?,
            content: row.try_get("content")?,
            author: row.try_get("author")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listing filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSortBy {
    CreatedAt,
    Status,
    AlertType,
    Author,
    Duration,
}

impl SessionSortBy {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Status => "status",
            Self::AlertType => "alert_type",
            Self::Author => "author",
            Self::Duration => "(coalesce(completed_at, now()) - started_at)",
        }
    }
}

impl FromStr for SessionSortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "created_at" => Ok(Self::CreatedAt),
            "status" => Ok(Self::Status),
            "alert_type" => Ok(Self::AlertType),
            "author" => Ok(Self::Author),
            "duration" => Ok(Self::Duration),
            other => Err(Error::validation(
                "sort_by",
                format!("invalid sort field: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::validation(
                "sort_order",
                format!("invalid sort order: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionFilter {
    pub status: Vec<SessionStatus>,
    pub alert_type: Option<String>,
    pub chain_id: Option<String>,
    /// Full-text search; the API layer enforces the 3-character minimum.
    pub search: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub sort_by: SessionSortBy,
    pub sort_order: SortOrder,
    pub page: u32,
    pub page_size: u32,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            status: Vec::new(),
            alert_type: None,
            chain_id: None,
            search: None,
            start_date: None,
            end_date: None,
            sort_by: SessionSortBy::CreatedAt,
            sort_order: SortOrder::Desc,
            page: 1,
            page_size: 20,
        }
    }
}

/// Counts reported by the session summary endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionSummary {
    pub stage_count: i64,
    pub execution_count: i64,
    pub timeline_event_count: i64,
    pub llm_interaction_count: i64,
    pub mcp_interaction_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_by_rejects_unknown_field() {
        let err = "unknown_field".parse::<SessionSortBy>().unwrap_err();
        assert!(err.to_string().contains("invalid sort field"));
    }

    #[test]
    fn sort_order_parses_both_directions() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("up".parse::<SortOrder>().is_err());
    }

    #[test]
    fn duration_sort_uses_elapsed_expression() {
        assert!(SessionSortBy::Duration.sql().contains("completed_at"));
    }
}
