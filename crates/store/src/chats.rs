//! Chat rows, chat user messages, chat-stage admission, session scores.

use tarsy_domain::{Error, Result};

use crate::models::{Chat, ChatUserMessage, Stage};
use crate::{db_err, new_id, Store};

impl Store {
    /// One chat per session; concurrent creators converge on the same row.
    pub async fn get_or_create_chat(&self, session_id: &str, author: &str) -> Result<Chat> {
        let id = new_id();
        sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chats (id, session_id, author)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO UPDATE SET session_id = excluded.session_id
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(author)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn get_chat(&self, session_id: &str) -> Result<Chat> {
        sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound)
    }

    pub async fn insert_chat_message(
        &self,
        chat_id: &str,
        content: &str,
        author: &str,
    ) -> Result<ChatUserMessage> {
        let id = new_id();
        sqlx::query_as::<_, ChatUserMessage>(
            r#"
            INSERT INTO chat_user_messages (id, chat_id, sequence_number, content, author)
            SELECT $1, $2, coalesce(max(sequence_number), 0) + 1, $3, $4
            FROM chat_user_messages WHERE chat_id = $2
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(chat_id)
        .bind(content)
        .bind(author)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    /// Remove a user message whose submission was rejected after the row
    /// was created (orphan cleanup).
    pub async fn delete_chat_message(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chat_user_messages WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_chat_messages(&self, chat_id: &str) -> Result<Vec<ChatUserMessage>> {
        sqlx::query_as::<_, ChatUserMessage>(
            "SELECT * FROM chat_user_messages WHERE chat_id = $1 ORDER BY sequence_number",
        )
        .bind(chat_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    /// Create the response stage for a chat message.
    ///
    /// The partial unique index on live chat stages is the cross-replica
    /// single-flight: a concurrent submission loses the insert race and
    /// surfaces as `ChatExecutionActive`.
    pub async fn insert_chat_stage(
        &self,
        session_id: &str,
        chat_user_message_id: &str,
        name: &str,
    ) -> Result<Stage> {
        let id = new_id();
        let result = sqlx::query_as::<_, Stage>(
            r#"
            INSERT INTO stages
                (id, session_id, name, stage_index, expected_agents,
                 success_policy, chat_user_message_id)
            SELECT $1, $2, $3, coalesce(max(stage_index), -1) + 1, 1, 'all', $4
            FROM stages WHERE session_id = $2
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(name)
        .bind(chat_user_message_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err);

        match result {
            Ok(stage) => {
                self.touch_session(session_id).await?;
                Ok(stage)
            }
            Err(Error::AlreadyExists(constraint)) if constraint.contains("active_chat") => {
                Err(Error::ChatExecutionActive)
            }
            Err(e) => Err(e),
        }
    }

    // ── Scores ──────────────────────────────────────────────────────

    /// Queue a score request; the partial unique index caps a session at
    /// one pending/in_progress score. Returns false when one is already
    /// queued.
    pub async fn enqueue_session_score(&self, session_id: &str) -> Result<bool> {
        let id = new_id();
        let result = sqlx::query(
            "INSERT INTO session_scores (id, session_id) VALUES ($1, $2)",
        )
        .bind(&id)
        .bind(session_id)
        .execute(self.pool())
        .await
        .map_err(db_err);

        match result {
            Ok(_) => Ok(true),
            Err(Error::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
