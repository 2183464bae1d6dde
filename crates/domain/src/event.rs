//! Publish-event vocabulary — the frames fanned out to WebSocket
//! subscribers.
//!
//! Every frame is flat JSON: `{type, session_id, timestamp, ...payload}`
//! with an RFC3339 nanosecond timestamp. Per-session publish order is the
//! order subscribers observe; the only frames the publisher may drop under
//! backpressure are in-flight `timeline_event.updated` streaming deltas.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::status::{EventStatus, SessionStatus, StageStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.status")]
    SessionStatus,
    #[serde(rename = "stage.status")]
    StageStatus,
    #[serde(rename = "agent_execution.status")]
    AgentExecutionStatus,
    #[serde(rename = "timeline_event.created")]
    TimelineEventCreated,
    #[serde(rename = "timeline_event.updated")]
    TimelineEventUpdated,
    #[serde(rename = "timeline_event.completed")]
    TimelineEventCompleted,
    #[serde(rename = "chat.created")]
    ChatCreated,
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "llm_interaction.created")]
    LlmInteractionCreated,
    #[serde(rename = "mcp_interaction.created")]
    McpInteractionCreated,
}

impl EventKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionStatus => "session.status",
            Self::StageStatus => "stage.status",
            Self::AgentExecutionStatus => "agent_execution.status",
            Self::TimelineEventCreated => "timeline_event.created",
            Self::TimelineEventUpdated => "timeline_event.updated",
            Self::TimelineEventCompleted => "timeline_event.completed",
            Self::ChatCreated => "chat.created",
            Self::MessageCreated => "message.created",
            Self::LlmInteractionCreated => "llm_interaction.created",
            Self::McpInteractionCreated => "mcp_interaction.created",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeline event types (the user-facing progress entries)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    LlmThinking,
    LlmResponse,
    LlmToolCall,
    McpToolSummary,
    UserQuestion,
    ExecutiveSummary,
    FinalAnalysis,
    TaskAssigned,
    Error,
    SystemMarker,
}

impl TimelineEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LlmThinking => "llm_thinking",
            Self::LlmResponse => "llm_response",
            Self::LlmToolCall => "llm_tool_call",
            Self::McpToolSummary => "mcp_tool_summary",
            Self::UserQuestion => "user_question",
            Self::ExecutiveSummary => "executive_summary",
            Self::FinalAnalysis => "final_analysis",
            Self::TaskAssigned => "task_assigned",
            Self::Error => "error",
            Self::SystemMarker => "system_marker",
        }
    }
}

impl std::str::FromStr for TimelineEventType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_thinking" => Ok(Self::LlmThinking),
            "llm_response" => Ok(Self::LlmResponse),
            "llm_tool_call" => Ok(Self::LlmToolCall),
            "mcp_tool_summary" => Ok(Self::McpToolSummary),
            "user_question" => Ok(Self::UserQuestion),
            "executive_summary" => Ok(Self::ExecutiveSummary),
            "final_analysis" => Ok(Self::FinalAnalysis),
            "task_assigned" => Ok(Self::TaskAssigned),
            "error" => Ok(Self::Error),
            "system_marker" => Ok(Self::SystemMarker),
            other => Err(crate::error::Error::validation(
                "event_type",
                format!("invalid timeline event type: {other}"),
            )),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionEvent — one publishable frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Kind-specific fields merged flat into the frame.
    pub payload: Value,
}

impl SessionEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn session_created(session_id: &str, alert_type: &str, chain_id: &str) -> Self {
        Self::new(
            EventKind::SessionCreated,
            session_id,
            json!({ "alert_type": alert_type, "chain_id": chain_id }),
        )
    }

    pub fn session_status(session_id: &str, status: SessionStatus) -> Self {
        Self::new(
            EventKind::SessionStatus,
            session_id,
            json!({ "status": status }),
        )
    }

    pub fn stage_status(
        session_id: &str,
        stage_id: &str,
        stage_index: i32,
        status: StageStatus,
    ) -> Self {
        Self::new(
            EventKind::StageStatus,
            session_id,
            json!({ "stage_id": stage_id, "stage_index": stage_index, "status": status }),
        )
    }

    pub fn execution_status(
        session_id: &str,
        execution_id: &str,
        agent_name: &str,
        status: StageStatus,
    ) -> Self {
        Self::new(
            EventKind::AgentExecutionStatus,
            session_id,
            json!({ "execution_id": execution_id, "agent": agent_name, "status": status }),
        )
    }

    pub fn timeline_created(
        session_id: &str,
        event_id: &str,
        event_type: TimelineEventType,
        sequence_number: i64,
    ) -> Self {
        Self::new(
            EventKind::TimelineEventCreated,
            session_id,
            json!({
                "event_id": event_id,
                "event_type": event_type,
                "sequence_number": sequence_number,
                "status": EventStatus::Streaming,
            }),
        )
    }

    pub fn timeline_updated(session_id: &str, event_id: &str, delta: &str) -> Self {
        Self::new(
            EventKind::TimelineEventUpdated,
            session_id,
            json!({
                "event_id": event_id,
                "delta": delta,
                "status": EventStatus::Streaming,
            }),
        )
    }

    pub fn timeline_completed(session_id: &str, event_id: &str, status: EventStatus) -> Self {
        Self::new(
            EventKind::TimelineEventCompleted,
            session_id,
            json!({ "event_id": event_id, "status": status }),
        )
    }

    pub fn chat_created(session_id: &str, chat_id: &str, stage_id: &str) -> Self {
        Self::new(
            EventKind::ChatCreated,
            session_id,
            json!({ "chat_id": chat_id, "stage_id": stage_id }),
        )
    }

    pub fn message_created(session_id: &str, execution_id: &str, role: &str) -> Self {
        Self::new(
            EventKind::MessageCreated,
            session_id,
            json!({ "execution_id": execution_id, "role": role }),
        )
    }

    pub fn llm_interaction(session_id: &str, interaction_id: &str, execution_id: &str) -> Self {
        Self::new(
            EventKind::LlmInteractionCreated,
            session_id,
            json!({ "interaction_id": interaction_id, "execution_id": execution_id }),
        )
    }

    pub fn mcp_interaction(session_id: &str, interaction_id: &str, execution_id: &str) -> Self {
        Self::new(
            EventKind::McpInteractionCreated,
            session_id,
            json!({ "interaction_id": interaction_id, "execution_id": execution_id }),
        )
    }

    /// Whether the backpressure policy may drop this frame: only
    /// in-flight streaming deltas qualify. Terminal and `*.created`
    /// frames must always be delivered.
    pub fn is_droppable(&self) -> bool {
        self.kind == EventKind::TimelineEventUpdated
            && self.payload.get("status").and_then(Value::as_str) == Some("streaming")
    }

    /// Render the flat wire frame.
    pub fn to_frame(&self) -> Value {
        let mut frame = json!({
            "type": self.kind.wire_name(),
            "session_id": self.session_id,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        });
        if let (Some(obj), Some(extra)) = (frame.as_object_mut(), self.payload.as_object()) {
            for (key, value) in extra {
                obj.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_flat_with_base_fields() {
        let event = SessionEvent::stage_status("s1", "st1", 0, StageStatus::Active);
        let frame = event.to_frame();
        assert_eq!(frame["type"], "stage.status");
        assert_eq!(frame["session_id"], "s1");
        assert_eq!(frame["stage_id"], "st1");
        assert_eq!(frame["status"], "active");
        // RFC3339 with nanosecond precision ends in Z after 9 fractional digits.
        let ts = frame["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        let frac = ts.split('.').nth(1).unwrap();
        assert_eq!(frac.len(), 10); // 9 digits + 'Z'
    }

    #[test]
    fn payload_cannot_shadow_base_fields() {
        let event = SessionEvent::new(
            EventKind::SessionStatus,
            "s1",
            json!({ "session_id": "spoofed", "status": "completed" }),
        );
        assert_eq!(event.to_frame()["session_id"], "s1");
    }

    #[test]
    fn only_streaming_updates_are_droppable() {
        assert!(SessionEvent::timeline_updated("s", "e", "chunk").is_droppable());
        assert!(!SessionEvent::timeline_created(
            "s",
            "e",
            TimelineEventType::LlmThinking,
            1
        )
        .is_droppable());
        assert!(
            !SessionEvent::timeline_completed("s", "e", EventStatus::Completed).is_droppable()
        );
        assert!(!SessionEvent::session_status("s", SessionStatus::Completed).is_droppable());
    }

    #[test]
    fn kind_wire_names_round_trip_serde() {
        let kinds = [
            EventKind::SessionCreated,
            EventKind::SessionStatus,
            EventKind::StageStatus,
            EventKind::AgentExecutionStatus,
            EventKind::TimelineEventCreated,
            EventKind::TimelineEventUpdated,
            EventKind::TimelineEventCompleted,
            EventKind::ChatCreated,
            EventKind::MessageCreated,
            EventKind::LlmInteractionCreated,
            EventKind::McpInteractionCreated,
        ];
        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.wire_name()));
            let back: EventKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
