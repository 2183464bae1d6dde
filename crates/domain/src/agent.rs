//! Contracts between the investigation runner and the agent layer.
//!
//! The runner owns persistence and publishing; agents own reasoning. An
//! agent receives an [`AgentTask`] plus an [`ExecutionSink`] it records
//! progress through, and returns an [`AgentOutcome`]. Adapter errors are
//! recorded as failed executions — they never cross this seam as panics.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::TimelineEventType;
use crate::status::{EventStatus, ExecutionStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(crate::error::Error::validation(
                "role",
                format!("invalid message role: {other}"),
            )),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// MCP server the tool lives on.
    pub server: String,
    pub tool: String,
    pub arguments: Value,
}

/// One structured LLM conversation entry for an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `tool` messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interaction records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full technical record of one LLM provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub backend: String,
    pub model: Option<String>,
    pub request: Value,
    pub response: Value,
    pub latency_ms: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub error: Option<String>,
}

/// Full technical record of one MCP tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpCallRecord {
    pub server: String,
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
    pub latency_ms: i64,
    pub error: Option<String>,
    /// True when the result was redacted by the masking layer.
    pub masked: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything an agent needs to run one execution.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub session_id: String,
    pub stage_id: String,
    pub execution_id: String,
    pub agent_name: String,
    pub alert_type: String,
    pub alert_data: String,
    pub runbook: Option<String>,
    /// What this execution is expected to do (shown on the timeline).
    pub task_description: String,
    /// Prior findings carried into follow-up work (chat runs against a
    /// finished session get its final analysis here).
    pub context: Option<String>,
    pub llm_backend: String,
    /// MCP servers this execution may call. `None` = all configured.
    pub mcp_selection: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: ExecutionStatus,
    pub final_text: Option<String>,
}

impl AgentOutcome {
    pub fn completed(final_text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            final_text: Some(final_text.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ExecutionStatus::Failed,
            final_text: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            final_text: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Recording callbacks handed to an agent for one execution.
///
/// Implemented by the gateway: every call persists a row, touches the
/// session's `last_interaction_at`, and publishes the matching frame.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Open a streaming timeline event; returns its id.
    async fn begin_event(
        &self,
        event_type: TimelineEventType,
        content: &str,
        metadata: Value,
    ) -> Result<String>;

    /// Append streamed content to an open event.
    async fn append_event(&self, event_id: &str, delta: &str) -> Result<()>;

    /// Finalize an event with a terminal status and optional full content.
    async fn complete_event(
        &self,
        event_id: &str,
        status: EventStatus,
        content: Option<&str>,
    ) -> Result<()>;

    /// Attach the full interaction record behind a timeline event.
    async fn link_event(
        &self,
        event_id: &str,
        llm_interaction_id: Option<&str>,
        mcp_interaction_id: Option<&str>,
    ) -> Result<()>;

    /// Append one conversation message for this execution.
    async fn record_message(&self, message: ConversationMessage) -> Result<()>;

    /// Persist a full LLM interaction record; returns its id.
    async fn record_llm_interaction(&self, record: LlmCallRecord) -> Result<String>;

    /// Persist a full MCP interaction record; returns its id.
    async fn record_mcp_interaction(&self, record: McpCallRecord) -> Result<String>;

    /// Dispatch a sub-agent under this execution and wait for it.
    async fn spawn_subagent(
        &self,
        agent_name: &str,
        task_description: &str,
    ) -> Result<AgentOutcome>;
}

/// One concrete agent implementation.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn run(
        &self,
        task: AgentTask,
        sink: Arc<dyn ExecutionSink>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_role_round_trip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            assert_eq!(role.as_str().parse::<MessageRole>().unwrap(), role);
        }
    }

    #[test]
    fn conversation_message_omits_empty_tool_fields() {
        let msg = ConversationMessage::text(MessageRole::User, "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }
}
