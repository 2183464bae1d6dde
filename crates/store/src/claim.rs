//! Row-level claim of pending sessions — worker pickup, orphan reclaim,
//! and the conditional cancel transition.
//!
//! Everything here must stay correct with N replicas hammering the same
//! table: claims ride on `FOR UPDATE SKIP LOCKED`, reclaim and cancel
//! are guarded single-statement updates.

use serde_json::json;

use tarsy_domain::event::TimelineEventType;
use tarsy_domain::status::{EventStatus, SessionStatus};
use tarsy_domain::{Error, Result};

use crate::models::Session;
use crate::{db_err, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pod liveness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Answers "is the pod behind this claim still alive?" during orphan
/// reclaim. Multi-replica deployments back this with a heartbeat table;
/// the single-replica default only trusts itself.
pub trait PodLivenessOracle: Send + Sync {
    fn is_alive(&self, pod_id: &str) -> bool;
}

/// Single-replica rule: any pod id other than our own is dead.
pub struct SingleReplicaOracle {
    pub self_pod_id: String,
}

impl PodLivenessOracle for SingleReplicaOracle {
    fn is_alive(&self, pod_id: &str) -> bool {
        pod_id == self.self_pod_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claim operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    /// Atomically claim the oldest pending session for `pod_id`.
    ///
    /// `SKIP LOCKED` guarantees two replicas polling simultaneously
    /// never return the same row; the claimed session is already
    /// `in_progress` with `started_at` stamped when it comes back.
    pub async fn claim_one(&self, pod_id: &str) -> Result<Option<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = 'in_progress',
                pod_id = $1,
                started_at = coalesce(started_at, now()),
                last_interaction_at = now()
            WHERE id = (
                SELECT id FROM sessions
                WHERE status = 'pending' AND deleted_at IS NULL
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(pod_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }

    /// Return stale in_progress sessions owned by dead pods to
    /// `pending`, clearing `pod_id` but keeping `started_at` (reclaim is
    /// continuation, not restart). Returns the reclaimed session ids.
    pub async fn reclaim_orphans(
        &self,
        threshold: std::time::Duration,
        oracle: &dyn PodLivenessOracle,
    ) -> Result<Vec<String>> {
        let candidates: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, pod_id FROM sessions
            WHERE status = 'in_progress'
              AND last_interaction_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(threshold.as_secs_f64())
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut reclaimed = Vec::new();
        for (id, pod_id) in candidates {
            let pod = pod_id.unwrap_or_default();
            if oracle.is_alive(&pod) {
                continue;
            }

            // Guarded reset: only if the claim we saw is still in place.
            let result = sqlx::query(
                r#"
                UPDATE sessions
                SET status = 'pending', pod_id = NULL, last_interaction_at = now()
                WHERE id = $1 AND status = 'in_progress'
                  AND pod_id IS NOT DISTINCT FROM nullif($2, '')
                "#,
            )
            .bind(&id)
            .bind(&pod)
            .execute(self.pool())
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                self.append_timeline_event(
                    &id,
                    None,
                    TimelineEventType::SystemMarker,
                    EventStatus::Completed,
                    "session reclaimed from unresponsive pod",
                    json!({ "reclaimed_from": pod }),
                )
                .await?;
                tracing::warn!(session_id = %id, pod_id = %pod, "orphaned session reclaimed");
                reclaimed.push(id);
            }
        }
        Ok(reclaimed)
    }

    /// Hand a claimed session back to the queue (graceful shutdown):
    /// in_progress → pending with `pod_id` cleared, only if this pod
    /// still owns it. Returns whether the release happened.
    pub async fn release_session(&self, id: &str, pod_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'pending', pod_id = NULL, last_interaction_at = now()
            WHERE id = $1 AND status = 'in_progress' AND pod_id = $2
            "#,
        )
        .bind(id)
        .bind(pod_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    /// Conditional cancel.
    ///
    /// - `pending` cancels immediately (no worker ever saw it);
    /// - `in_progress` moves to `cancelling` for the owning worker to
    ///   observe;
    /// - `cancelling` / `cancelled` succeed idempotently without
    ///   touching the row;
    /// - other terminal statuses are not cancellable.
    ///
    /// Returns the status the session holds after the call.
    pub async fn cancel_if_cancellable(&self, id: &str) -> Result<SessionStatus> {
        let direct = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'cancelled', completed_at = now(), last_interaction_at = now()
            WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        if direct.rows_affected() == 1 {
            return Ok(SessionStatus::Cancelled);
        }

        let requested = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'cancelling', last_interaction_at = now()
            WHERE id = $1 AND status = 'in_progress' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        if requested.rows_affected() == 1 {
            return Ok(SessionStatus::Cancelling);
        }

        match self.get_session(id).await?.status {
            // Second cancel on an already-cancelling/cancelled session is
            // a success that changes nothing.
            status @ (SessionStatus::Cancelling | SessionStatus::Cancelled) => Ok(status),
            _ => Err(Error::NotCancellable),
        }
    }
}
