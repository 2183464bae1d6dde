//! Full technical records of LLM and MCP calls (the `/trace` surface).

use tarsy_domain::agent::{LlmCallRecord, McpCallRecord};
use tarsy_domain::{Error, Result};

use crate::models::{LlmInteraction, McpInteraction};
use crate::{db_err, new_id, Store};

impl Store {
    pub async fn insert_llm_interaction(
        &self,
        session_id: &str,
        execution_id: &str,
        record: &LlmCallRecord,
    ) -> Result<LlmInteraction> {
        let id = new_id();
        let interaction = sqlx::query_as::<_, LlmInteraction>(
            r#"
            INSERT INTO llm_interactions
                (id, session_id, execution_id, backend, model, request,
                 response, latency_ms, input_tokens, output_tokens, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(execution_id)
        .bind(&record.backend)
        .bind(&record.model)
        .bind(&record.request)
        .bind(&record.response)
        .bind(record.latency_ms)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(&record.error)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        self.touch_session(session_id).await?;
        Ok(interaction)
    }

    pub async fn insert_mcp_interaction(
        &self,
        session_id: &str,
        execution_id: &str,
        record: &McpCallRecord,
    ) -> Result<McpInteraction> {
        let id = new_id();
        let interaction = sqlx::query_as::<_, McpInteraction>(
            r#"
            INSERT INTO mcp_interactions
                (id, session_id, execution_id, server_name, tool_name,
                 arguments, result, latency_ms, error, masked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(execution_id)
        .bind(&record.server)
        .bind(&record.tool)
        .bind(&record.arguments)
        .bind(&record.result)
        .bind(record.latency_ms)
        .bind(&record.error)
        .bind(record.masked)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        self.touch_session(session_id).await?;
        Ok(interaction)
    }

    pub async fn get_llm_interaction(&self, id: &str) -> Result<LlmInteraction> {
        sqlx::query_as::<_, LlmInteraction>("SELECT * FROM llm_interactions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound)
    }

    pub async fn get_mcp_interaction(&self, id: &str) -> Result<McpInteraction> {
        sqlx::query_as::<_, McpInteraction>("SELECT * FROM mcp_interactions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound)
    }

    pub async fn list_llm_interactions(&self, session_id: &str) -> Result<Vec<LlmInteraction>> {
        sqlx::query_as::<_, LlmInteraction>(
            "SELECT * FROM llm_interactions WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn list_mcp_interactions(&self, session_id: &str) -> Result<Vec<McpInteraction>> {
        sqlx::query_as::<_, McpInteraction>(
            "SELECT * FROM mcp_interactions WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }
}
