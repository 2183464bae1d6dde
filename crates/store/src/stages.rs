//! Stage and agent-execution queries.

use tarsy_domain::chain::ParallelType;
use tarsy_domain::status::StageStatus;
use tarsy_domain::{Error, Result};

use crate::models::{AgentExecution, NewExecution, NewStage, Stage};
use crate::{db_err, new_id, Store};

impl Store {
    pub async fn insert_stage(&self, new: NewStage) -> Result<Stage> {
        let id = new_id();
        let parallel = new.parallel_type.map(|p| match p {
            ParallelType::MultiAgent => "multi_agent",
            ParallelType::Replica => "replica",
        });
        let policy = match new.success_policy {
            tarsy_domain::chain::SuccessPolicy::All => "all",
            tarsy_domain::chain::SuccessPolicy::Any => "any",
        };
        let stage = sqlx::query_as::<_, Stage>(
            r#"
            INSERT INTO stages
                (id, session_id, name, stage_index, expected_agents,
                 parallel_type, success_policy, chat_user_message_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.session_id)
        .bind(&new.name)
        .bind(new.stage_index)
        .bind(new.expected_agents)
        .bind(parallel)
        .bind(policy)
        .bind(&new.chat_user_message_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        self.touch_session(&new.session_id).await?;
        Ok(stage)
    }

    pub async fn get_stage(&self, id: &str) -> Result<Stage> {
        sqlx::query_as::<_, Stage>("SELECT * FROM stages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or(Error::NotFound)
    }

    pub async fn list_stages(&self, session_id: &str) -> Result<Vec<Stage>> {
        sqlx::query_as::<_, Stage>(
            "SELECT * FROM stages WHERE session_id = $1 ORDER BY stage_index",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    /// Move a stage's status; stamps started_at on activation and
    /// completed_at on terminal statuses.
    pub async fn set_stage_status(
        &self,
        id: &str,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<Stage> {
        let stage = sqlx::query_as::<_, Stage>(
            r#"
            UPDATE stages
            SET status = $2,
                started_at = CASE WHEN $2 = 'active' THEN coalesce(started_at, now())
                                  ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'timed_out', 'cancelled')
                                    THEN coalesce(completed_at, now())
                                    ELSE completed_at END,
                error = coalesce($3, error)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?
        .ok_or(Error::NotFound)?;

        self.touch_session(&stage.session_id).await?;
        Ok(stage)
    }

    // ── Executions ──────────────────────────────────────────────────

    pub async fn insert_execution(&self, new: NewExecution) -> Result<AgentExecution> {
        let id = new_id();
        let execution = sqlx::query_as::<_, AgentExecution>(
            r#"
            INSERT INTO agent_executions
                (id, stage_id, session_id, agent_name, agent_index,
                 parent_execution_id, llm_backend, task_description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.stage_id)
        .bind(&new.session_id)
        .bind(&new.agent_name)
        .bind(new.agent_index)
        .bind(&new.parent_execution_id)
        .bind(&new.llm_backend)
        .bind(&new.task_description)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        self.touch_session(&new.session_id).await?;
        Ok(execution)
    }

    pub async fn list_executions(&self, stage_id: &str) -> Result<Vec<AgentExecution>> {
        sqlx::query_as::<_, AgentExecution>(
            r#"
            SELECT * FROM agent_executions
            WHERE stage_id = $1
            ORDER BY (parent_execution_id IS NOT NULL), agent_index
            "#,
        )
        .bind(stage_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn set_execution_status(
        &self,
        id: &str,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<AgentExecution> {
        let execution = sqlx::query_as::<_, AgentExecution>(
            r#"
            UPDATE agent_executions
            SET status = $2,
                started_at = CASE WHEN $2 = 'active' THEN coalesce(started_at, now())
                                  ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'timed_out', 'cancelled')
                                    THEN coalesce(completed_at, now())
                                    ELSE completed_at END,
                error = coalesce($3, error)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?
        .ok_or(Error::NotFound)?;

        self.touch_session(&execution.session_id).await?;
        Ok(execution)
    }
}
