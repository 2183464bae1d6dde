//! Timeline events and conversation messages.
//!
//! Timeline rows are ordered by a per-session `sequence_number`
//! allocated inside the insert; the unique `(session_id,
//! sequence_number)` index arbitrates concurrent writers and the insert
//! retries on a lost race.

use serde_json::Value;

use tarsy_domain::agent::ConversationMessage;
use tarsy_domain::event::TimelineEventType;
use tarsy_domain::status::EventStatus;
use tarsy_domain::{Error, Result};

use crate::models::{MessageRecord, TimelineEvent};
use crate::{db_err, new_id, Store};

/// Concurrent executions of one session may race on the next sequence
/// number; a couple of retries is plenty.
const SEQUENCE_RETRIES: usize = 3;

impl Store {
    /// Append a timeline event. `status` is `streaming` for events that
    /// will receive deltas, or a terminal status for one-shot entries.
    pub async fn append_timeline_event(
        &self,
        session_id: &str,
        execution_id: Option<&str>,
        event_type: TimelineEventType,
        status: EventStatus,
        content: &str,
        metadata: Value,
    ) -> Result<TimelineEvent> {
        let mut last_err = None;
        for _ in 0..SEQUENCE_RETRIES {
            let id = new_id();
            let result = sqlx::query_as::<_, TimelineEvent>(
                r#"
                INSERT INTO timeline_events
                    (id, session_id, execution_id, sequence_number,
                     event_type, status, content, metadata)
                SELECT $1, $2, $3,
                       coalesce(max(sequence_number), 0) + 1,
                       $4, $5, $6, $7
                FROM timeline_events WHERE session_id = $2
                RETURNING *
                "#,
            )
            .bind(&id)
            .bind(session_id)
            .bind(execution_id)
            .bind(event_type.as_str())
            .bind(status.as_str())
            .bind(content)
            .bind(&metadata)
            .fetch_one(self.pool())
            .await
            .map_err(db_err);

            match result {
                Ok(event) => {
                    self.touch_session(session_id).await?;
                    return Ok(event);
                }
                Err(Error::AlreadyExists(_)) => {
                    last_err = Some(Error::AlreadyExists("sequence_number".into()));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(Error::Database("sequence allocation failed".into())))
    }

    /// Append streamed content to an open event.
    pub async fn append_timeline_content(&self, event_id: &str, delta: &str) -> Result<()> {
        let session_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE timeline_events
            SET content = content || $2, updated_at = now()
            WHERE id = $1 AND status = 'streaming'
            RETURNING session_id
            "#,
        )
        .bind(event_id)
        .bind(delta)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        match session_id {
            Some(session_id) => self.touch_session(&session_id).await,
            None => Err(Error::NotFound),
        }
    }

    /// Flush an event to a terminal status, optionally replacing its
    /// content with the finalized text.
    pub async fn finalize_timeline_event(
        &self,
        event_id: &str,
        status: EventStatus,
        content: Option<&str>,
    ) -> Result<TimelineEvent> {
        let event = sqlx::query_as::<_, TimelineEvent>(
            r#"
            UPDATE timeline_events
            SET status = $2, content = coalesce($3, content), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(content)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?
        .ok_or(Error::NotFound)?;

        self.touch_session(&event.session_id).await?;
        Ok(event)
    }

    /// Link an event to the interaction record behind it.
    pub async fn link_timeline_interaction(
        &self,
        event_id: &str,
        llm_interaction_id: Option<&str>,
        mcp_interaction_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE timeline_events
            SET llm_interaction_id = coalesce($2, llm_interaction_id),
                mcp_interaction_id = coalesce($3, mcp_interaction_id),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(llm_interaction_id)
        .bind(mcp_interaction_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_timeline(&self, session_id: &str) -> Result<Vec<TimelineEvent>> {
        sqlx::query_as::<_, TimelineEvent>(
            "SELECT * FROM timeline_events WHERE session_id = $1 ORDER BY sequence_number",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    /// Commit every still-streaming event of a session to a terminal
    /// status (cancel / timeout path). Returns how many were flushed.
    pub async fn flush_streaming_events(
        &self,
        session_id: &str,
        status: EventStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE timeline_events
            SET status = $2, updated_at = now()
            WHERE session_id = $1 AND status = 'streaming'
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Append one conversation message for an execution.
    pub async fn append_message(
        &self,
        execution_id: &str,
        message: &ConversationMessage,
    ) -> Result<MessageRecord> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&message.tool_calls).map_err(|e| Error::Other(e.to_string()))?)
        };

        let mut last_err = None;
        for _ in 0..SEQUENCE_RETRIES {
            let id = new_id();
            let result = sqlx::query_as::<_, MessageRecord>(
                r#"
                INSERT INTO messages
                    (id, execution_id, sequence_number, role, content,
                     tool_calls, tool_call_id)
                SELECT $1, $2, coalesce(max(sequence_number), 0) + 1, $3, $4, $5, $6
                FROM messages WHERE execution_id = $2
                RETURNING *
                "#,
            )
            .bind(&id)
            .bind(execution_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&tool_calls)
            .bind(&message.tool_call_id)
            .fetch_one(self.pool())
            .await
            .map_err(db_err);

            match result {
                Ok(record) => return Ok(record),
                Err(Error::AlreadyExists(_)) => {
                    last_err = Some(Error::AlreadyExists("sequence_number".into()));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(Error::Database("sequence allocation failed".into())))
    }

    pub async fn list_messages(&self, execution_id: &str) -> Result<Vec<MessageRecord>> {
        sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE execution_id = $1 ORDER BY sequence_number",
        )
        .bind(execution_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }
}
