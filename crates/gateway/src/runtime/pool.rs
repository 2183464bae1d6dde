//! Worker pool — claims pending sessions and runs them on a bounded set
//! of workers.
//!
//! One dispatcher loop wakes on the poll interval (or an internal
//! signal) and claims while free workers exist; each claim is handed to
//! a spawned worker holding a semaphore permit. A separate loop
//! reclaims orphans. DB trouble backs the dispatcher off exponentially
//! and shows up in the health snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tarsy_domain::config::WorkerConfig;
use tarsy_store::{PodLivenessOracle, Store};

use super::cancel::CancelMap;
use super::runner::InvestigationRunner;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolCondition {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub condition: PoolCondition,
    pub max_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    /// Sessions currently running on this pod.
    pub in_flight: Vec<String>,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub last_db_error: Option<String>,
    pub pending_sessions: i64,
}

#[derive(Default)]
struct HealthState {
    last_claim_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_claim_at` for staleness math.
    last_claim_instant: Option<Instant>,
    last_db_error: Option<String>,
    consecutive_db_errors: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PoolInner {
    store: Store,
    runner: InvestigationRunner,
    config: WorkerConfig,
    cancel_map: Arc<CancelMap>,
    oracle: Arc<dyn PodLivenessOracle>,
    wake: Notify,
    shutdown: CancellationToken,
    slots: Arc<Semaphore>,
    workers: TaskTracker,
    in_flight: Mutex<HashSet<String>>,
    health: Mutex<HealthState>,
    started_at: Instant,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        store: Store,
        runner: InvestigationRunner,
        config: WorkerConfig,
        cancel_map: Arc<CancelMap>,
        oracle: Arc<dyn PodLivenessOracle>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_workers));
        Self {
            inner: Arc::new(PoolInner {
                store,
                runner,
                config,
                cancel_map,
                oracle,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                slots,
                workers: TaskTracker::new(),
                in_flight: Mutex::new(HashSet::new()),
                health: Mutex::new(HealthState::default()),
                started_at: Instant::now(),
            }),
        }
    }

    /// Start the dispatcher and reclaim loops.
    pub fn start(&self) {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch_loop().await });

        let reclaimer = self.clone();
        tokio::spawn(async move { reclaimer.reclaim_loop().await });

        tracing::info!(
            pod_id = %self.inner.config.pod_id,
            max_workers = self.inner.config.max_workers,
            poll_interval_sec = self.inner.config.poll_interval.as_secs(),
            "worker pool started"
        );
    }

    /// Nudge the dispatcher (a new alert just landed).
    pub fn notify(&self) {
        self.inner.wake.notify_one();
    }

    /// Cancel the local context for a session if this pod runs it.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.inner.cancel_map.cancel(session_id)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // ── Dispatcher ──────────────────────────────────────────────────

    async fn dispatch_loop(&self) {
        let inner = &self.inner;
        let mut interval = tokio::time::interval(inner.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = inner.wake.notified() => {}
                _ = inner.shutdown.cancelled() => break,
            }

            if let Some(backoff) = self.claim_available().await {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = inner.shutdown.cancelled() => break,
                }
            }
        }
        tracing::debug!("dispatcher stopped");
    }

    /// Claim while free workers exist. Returns a backoff to apply when
    /// the database is misbehaving.
    async fn claim_available(&self) -> Option<Duration> {
        let inner = &self.inner;
        loop {
            if inner.shutdown.is_cancelled() {
                return None;
            }
            let Ok(permit) = inner.slots.clone().try_acquire_owned() else {
                return None; // all workers busy
            };

            match inner.store.claim_one(&inner.config.pod_id).await {
                Ok(Some(session)) => {
                    {
                        let mut health = inner.health.lock();
                        health.last_claim_at = Some(Utc::now());
                        health.last_claim_instant = Some(Instant::now());
                        health.last_db_error = None;
                        health.consecutive_db_errors = 0;
                    }
                    tracing::info!(
                        session_id = %session.id,
                        alert_type = %session.alert_type,
                        "session claimed"
                    );
                    self.spawn_worker(session, permit);
                }
                Ok(None) => {
                    let mut health = inner.health.lock();
                    health.last_db_error = None;
                    health.consecutive_db_errors = 0;
                    return None; // queue empty
                }
                Err(e) => {
                    let backoff = {
                        let mut health = inner.health.lock();
                        health.last_db_error = Some(e.to_string());
                        health.consecutive_db_errors =
                            health.consecutive_db_errors.saturating_add(1);
                        exponential_backoff(
                            inner.config.poll_interval,
                            health.consecutive_db_errors,
                        )
                    };
                    tracing::error!(error = %e, backoff_sec = backoff.as_secs(), "claim failed");
                    return Some(backoff);
                }
            }
        }
    }

    fn spawn_worker(&self, session: tarsy_store::Session, permit: tokio::sync::OwnedSemaphorePermit) {
        let inner = self.inner.clone();
        let pool = self.clone();
        let session_id = session.id.clone();

        let cancel = inner.cancel_map.register(&session_id, &inner.shutdown);
        inner.in_flight.lock().insert(session_id.clone());

        self.inner.workers.spawn(async move {
            let _permit = permit;
            inner.runner.run_session(session, cancel).await;

            inner.cancel_map.remove(&session_id);
            inner.in_flight.lock().remove(&session_id);
            // A slot just freed up — there may be pending work.
            pool.notify();
        });
    }

    // ── Reclaim ─────────────────────────────────────────────────────

    async fn reclaim_loop(&self) {
        let inner = &self.inner;
        // Orphans age on the threshold scale; scanning at half that is
        // timely without hammering the table.
        let cadence = (inner.config.orphan_threshold / 2).max(Duration::from_secs(15));
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = inner.shutdown.cancelled() => break,
            }

            match inner
                .store
                .reclaim_orphans(inner.config.orphan_threshold, inner.oracle.as_ref())
                .await
            {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::info!(count = reclaimed.len(), "orphaned sessions reclaimed");
                    inner.wake.notify_one();
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "orphan reclaim failed");
                }
            }
        }
        tracing::debug!("reclaim loop stopped");
    }

    // ── Health ──────────────────────────────────────────────────────

    pub async fn health(&self) -> PoolHealth {
        let inner = &self.inner;
        let pending = inner.store.count_pending_sessions().await.unwrap_or(-1);

        let (last_claim_at, last_claim_instant, last_db_error) = {
            let health = inner.health.lock();
            (
                health.last_claim_at,
                health.last_claim_instant,
                health.last_db_error.clone(),
            )
        };

        let active = inner.config.max_workers - inner.slots.available_permits();
        let in_flight: Vec<String> = {
            let mut ids: Vec<String> = inner.in_flight.lock().iter().cloned().collect();
            ids.sort();
            ids
        };

        // Unhealthy: pending work exists but nothing has been claimed
        // for more than twice the poll interval. Degraded: the last
        // database call failed.
        let claim_stale = {
            let reference = last_claim_instant.unwrap_or(inner.started_at);
            reference.elapsed() > inner.config.poll_interval * 2
        };
        let condition = if pending > 0 && claim_stale && active < inner.config.max_workers {
            PoolCondition::Unhealthy
        } else if last_db_error.is_some() || pending < 0 {
            PoolCondition::Degraded
        } else {
            PoolCondition::Healthy
        };

        PoolHealth {
            condition,
            max_workers: inner.config.max_workers,
            active_workers: active,
            idle_workers: inner.config.max_workers - active,
            in_flight,
            last_claim_at,
            last_db_error,
            pending_sessions: pending.max(0),
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Graceful stop: no new claims, cancel in-flight workers, wait up
    /// to `shutdown_grace`, then hand unfinished sessions back to the
    /// queue for another pod.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        tracing::info!("worker pool shutting down");
        inner.shutdown.cancel();
        inner.workers.close();

        if tokio::time::timeout(inner.config.shutdown_grace, inner.workers.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                grace_sec = inner.config.shutdown_grace.as_secs(),
                "workers did not finish within the shutdown grace"
            );
        }

        let leftover: Vec<String> = inner.in_flight.lock().iter().cloned().collect();
        for session_id in leftover {
            match inner
                .store
                .release_session(&session_id, &inner.config.pod_id)
                .await
            {
                Ok(true) => {
                    tracing::info!(session_id = %session_id, "session released for another pod");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "failed to release session");
                }
            }
        }
    }
}

fn exponential_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(6));
    (base * factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(exponential_backoff(base, 1), Duration::from_secs(4));
        assert_eq!(exponential_backoff(base, 2), Duration::from_secs(8));
        assert_eq!(exponential_backoff(base, 10), MAX_BACKOFF);
    }
}
