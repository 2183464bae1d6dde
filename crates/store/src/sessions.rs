//! Session queries: submit, lookup, listing with filters + full-text
//! search, status transitions, soft delete.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder, Row};

use tarsy_domain::status::SessionStatus;
use tarsy_domain::{Error, Result};

use crate::models::{NewSession, Session, SessionFilter, SessionSummary};
use crate::{db_err, new_id, Store};

/// Distinct values offered to the dashboard filter bar.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub statuses: Vec<String>,
    pub alert_types: Vec<String>,
    pub chain_ids: Vec<String>,
    pub authors: Vec<String>,
}

impl Store {
    /// Create the session row for a submitted alert. Status starts at
    /// `pending`; a worker claim moves it forward.
    pub async fn insert_session(&self, new: NewSession) -> Result<Session> {
        let id = new_id();
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions
                (id, alert_type, alert_data, chain_id, author, runbook,
                 mcp_selection, slack_message_fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.alert_type)
        .bind(&new.alert_data)
        .bind(&new.chain_id)
        .bind(&new.author)
        .bind(&new.runbook)
        .bind(&new.mcp_selection)
        .bind(&new.slack_message_fingerprint)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    /// Fetch one session; soft-deleted rows are invisible.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?
        .ok_or(Error::NotFound)
    }

    /// Paginated listing with filters. Returns `(page, total_matching)`.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<(Vec<Session>, i64)> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT count(*) FROM sessions WHERE deleted_at IS NULL");
        apply_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(self.pool())
            .await
            .map_err(db_err)?
            .try_get(0)
            .map_err(db_err)?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM sessions WHERE deleted_at IS NULL");
        apply_filters(&mut qb, filter);
        qb.push(format!(
            " ORDER BY {} {} LIMIT ",
            filter.sort_by.sql(),
            filter.sort_order.sql()
        ));
        qb.push_bind(filter.page_size as i64);
        qb.push(" OFFSET ");
        qb.push_bind((filter.page.saturating_sub(1) as i64) * filter.page_size as i64);

        let sessions = qb
            .build_query_as::<Session>()
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        Ok((sessions, total))
    }

    /// Queue depth visible to the worker-pool health check.
    pub async fn count_pending_sessions(&self) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT count(*) FROM sessions WHERE status = 'pending' AND deleted_at IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    /// Sessions currently pending or under investigation.
    pub async fn active_sessions(&self) -> Result<Vec<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE status IN ('pending', 'in_progress', 'cancelling')
              AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    /// Guarded status transition: validates the lattice, then commits
    /// only if the row is still in `from`. Returns false when another
    /// writer moved the session first.
    pub async fn transition_session(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(Error::validation(
                "status",
                format!("illegal transition {from} -> {to}"),
            ));
        }
        let completed_at = to.is_terminal().then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = $3,
                completed_at = coalesce($4, completed_at),
                last_interaction_at = now()
            WHERE id = $1 AND status = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(completed_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    /// Bump `last_interaction_at` (orphan-detection heartbeat).
    pub async fn touch_session(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_interaction_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_current_stage_index(&self, id: &str, index: Option<i32>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET current_stage_index = $2, last_interaction_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(index)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_final_analysis(
        &self,
        id: &str,
        final_analysis: &str,
        executive_summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET final_analysis = $2,
                executive_summary = $3,
                last_interaction_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(final_analysis)
        .bind(executive_summary)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Summary generation failure is recorded, never fatal.
    pub async fn set_executive_summary_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET executive_summary_error = $2, last_interaction_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Soft-delete terminal sessions past retention. The tree stays on
    /// disk; listings and lookups no longer see it.
    pub async fn soft_delete_expired(&self, retention_days: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET deleted_at = now()
            WHERE deleted_at IS NULL
              AND status IN ('completed', 'failed', 'cancelled', 'timed_out')
              AND completed_at < now() - make_interval(days => $1)
            "#,
        )
        .bind(retention_days as i32)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Counts for the summary endpoint, gathered by explicit subqueries.
    pub async fn session_summary(&self, id: &str) -> Result<SessionSummary> {
        // Existence check first so a bad id is a 404, not empty counts.
        self.get_session(id).await?;
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM stages WHERE session_id = $1) AS stage_count,
                (SELECT count(*) FROM agent_executions WHERE session_id = $1) AS execution_count,
                (SELECT count(*) FROM timeline_events WHERE session_id = $1) AS timeline_event_count,
                (SELECT count(*) FROM llm_interactions WHERE session_id = $1) AS llm_interaction_count,
                (SELECT count(*) FROM mcp_interactions WHERE session_id = $1) AS mcp_interaction_count
            "#,
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        Ok(SessionSummary {
            stage_count: row.try_get("stage_count").map_err(db_err)?,
            execution_count: row.try_get("execution_count").map_err(db_err)?,
            timeline_event_count: row.try_get("timeline_event_count").map_err(db_err)?,
            llm_interaction_count: row.try_get("llm_interaction_count").map_err(db_err)?,
            mcp_interaction_count: row.try_get("mcp_interaction_count").map_err(db_err)?,
        })
    }

    pub async fn filter_options(&self) -> Result<FilterOptions> {
        let alert_types: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT alert_type FROM sessions WHERE deleted_at IS NULL ORDER BY alert_type",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let chain_ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT chain_id FROM sessions WHERE deleted_at IS NULL ORDER BY chain_id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let authors: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT author FROM sessions WHERE deleted_at IS NULL ORDER BY author",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(FilterOptions {
            statuses: [
                "pending",
                "in_progress",
                "cancelling",
                "completed",
                "failed",
                "cancelled",
                "timed_out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            alert_types,
            chain_ids,
            authors,
        })
    }
}

fn apply_filters(qb: &mut QueryBuilder<Postgres>, filter: &SessionFilter) {
    if !filter.status.is_empty() {
        let statuses: Vec<String> = filter.status.iter().map(|s| s.as_str().into()).collect();
        qb.push(" AND status = ANY(");
        qb.push_bind(statuses);
        qb.push(")");
    }
    if let Some(ref alert_type) = filter.alert_type {
        qb.push(" AND alert_type = ");
        qb.push_bind(alert_type.clone());
    }
    if let Some(ref chain_id) = filter.chain_id {
        qb.push(" AND chain_id = ");
        qb.push_bind(chain_id.clone());
    }
    if let Some(ref search) = filter.search {
        qb.push(" AND (to_tsvector('english', alert_data) @@ plainto_tsquery('english', ");
        qb.push_bind(search.clone());
        qb.push(") OR to_tsvector('english', coalesce(final_analysis, '')) @@ plainto_tsquery('english', ");
        qb.push_bind(search.clone());
        qb.push("))");
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND created_at >= ");
        qb.push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND created_at <= ");
        qb.push_bind(end);
    }
}
