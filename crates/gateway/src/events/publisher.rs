//! Event publisher — the non-blocking seam between the runner and the
//! WebSocket fan-out.
//!
//! `publish` enqueues onto a per-session bounded queue and returns; a
//! single dispatcher task drains the queues round-robin and hands each
//! frame to the fan-out. Per-session FIFO order is preserved end to
//! end. When a session's queue is full, the oldest still-droppable
//! frame (a streaming delta) is discarded and counted; terminal and
//! `*.created` frames are never dropped, even if the queue must grow
//! past its bound to keep them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tarsy_domain::event::SessionEvent;

/// Delivery side of the publisher; the connection manager in
/// production, a collector in tests.
pub trait EventFanout: Send + Sync {
    fn deliver(&self, event: &SessionEvent);
}

struct Inner {
    queues: Mutex<HashMap<String, VecDeque<SessionEvent>>>,
    ready: Notify,
    session_queue_cap: usize,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<Inner>,
}

impl EventPublisher {
    /// Create the publisher and start its dispatcher task.
    pub fn spawn(
        fanout: Arc<dyn EventFanout>,
        session_queue_cap: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let inner = Arc::new(Inner {
            queues: Mutex::new(HashMap::new()),
            ready: Notify::new(),
            session_queue_cap,
            dropped: AtomicU64::new(0),
        });

        let dispatcher_inner = inner.clone();
        tokio::spawn(async move {
            loop {
                let drained = drain_once(&dispatcher_inner, fanout.as_ref());
                if drained == 0 {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = dispatcher_inner.ready.notified() => {}
                        _ = shutdown.cancelled() => {
                            // Final drain so terminal frames published
                            // during shutdown still go out.
                            drain_once(&dispatcher_inner, fanout.as_ref());
                            break;
                        }
                    }
                } else {
                    // Yield between batches so slow fan-out cannot
                    // starve the runtime.
                    tokio::task::yield_now().await;
                }
            }
            tracing::debug!("event dispatcher stopped");
        });

        Self { inner }
    }

    /// Enqueue one frame; never blocks the caller.
    pub fn publish(&self, event: SessionEvent) {
        {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(event.session_id.clone()).or_default();

            if queue.len() >= self.inner.session_queue_cap {
                if let Some(drop_idx) = queue.iter().position(SessionEvent::is_droppable) {
                    queue.remove(drop_idx);
                    let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        session_id = %event.session_id,
                        dropped_total = total,
                        "session event queue full — dropped oldest streaming delta"
                    );
                }
            }
            queue.push_back(event);
        }
        self.inner.ready.notify_one();
    }

    /// Total frames discarded under backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Frames currently queued across all sessions.
    pub fn backlog(&self) -> usize {
        self.inner.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// Pop one frame per session per pass so one noisy session cannot
/// starve the others; within a session, order is FIFO.
fn drain_once(inner: &Inner, fanout: &dyn EventFanout) -> usize {
    let batch: Vec<SessionEvent> = {
        let mut queues = inner.queues.lock();
        let batch: Vec<SessionEvent> = queues
            .values_mut()
            .filter_map(VecDeque::pop_front)
            .collect();
        queues.retain(|_, q| !q.is_empty());
        batch
    };

    for event in &batch {
        fanout.deliver(event);
    }
    batch.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tarsy_domain::event::{EventKind, TimelineEventType};
    use tarsy_domain::status::{EventStatus, SessionStatus};

    struct Collector {
        seen: Mutex<Vec<SessionEvent>>,
        notify: Notify,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }

        async fn wait_for(&self, count: usize) -> Vec<SessionEvent> {
            loop {
                {
                    let seen = self.seen.lock();
                    if seen.len() >= count {
                        return seen.clone();
                    }
                }
                tokio::time::timeout(std::time::Duration::from_secs(2), self.notify.notified())
                    .await
                    .expect("fanout did not receive expected events");
            }
        }
    }

    impl EventFanout for Collector {
        fn deliver(&self, event: &SessionEvent) {
            self.seen.lock().push(event.clone());
            self.notify.notify_waiters();
        }
    }

    #[tokio::test]
    async fn per_session_order_is_preserved() {
        let collector = Collector::new();
        let publisher = EventPublisher::spawn(
            collector.clone(),
            512,
            CancellationToken::new(),
        );

        for i in 0..50 {
            publisher.publish(SessionEvent::timeline_updated("s1", "e1", &format!("{i}")));
        }
        publisher.publish(SessionEvent::session_status("s1", SessionStatus::Completed));

        let seen = collector.wait_for(51).await;
        let s1_frames: Vec<&SessionEvent> =
            seen.iter().filter(|e| e.session_id == "s1").collect();

        // Deltas arrive in publish order; the terminal frame is last.
        let deltas: Vec<String> = s1_frames
            .iter()
            .filter(|e| e.kind == EventKind::TimelineEventUpdated)
            .map(|e| e.payload["delta"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(deltas, expected);
        assert_eq!(s1_frames.last().unwrap().kind, EventKind::SessionStatus);
    }

    #[tokio::test]
    async fn overflow_drops_streaming_deltas_never_terminals() {
        let collector = Collector::new();
        // Dispatcher kept busy by a never-notified start: publish while
        // holding it saturated instead — easiest is a tiny cap.
        let shutdown = CancellationToken::new();
        let publisher = EventPublisher::spawn(collector.clone(), 16, shutdown.clone());

        // Publish synchronously faster than the single dispatcher can
        // drain; with cap 16 some deltas must be dropped.
        publisher.publish(SessionEvent::timeline_created(
            "s1",
            "e1",
            TimelineEventType::LlmThinking,
            1,
        ));
        for i in 0..2_000 {
            publisher.publish(SessionEvent::timeline_updated("s1", "e1", &format!("{i}")));
        }
        publisher.publish(SessionEvent::timeline_completed(
            "s1",
            "e1",
            EventStatus::Completed,
        ));
        publisher.publish(SessionEvent::session_status("s1", SessionStatus::Completed));

        // Wait until the backlog fully drains.
        while publisher.backlog() > 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = collector.seen.lock().clone();
        // The undroppable frames all made it through.
        assert!(seen.iter().any(|e| e.kind == EventKind::TimelineEventCreated));
        assert!(seen.iter().any(|e| e.kind == EventKind::TimelineEventCompleted));
        assert!(seen.iter().any(|e| e.kind == EventKind::SessionStatus));

        // Delivered deltas are a strictly increasing subsequence of the
        // published sequence.
        let deltas: Vec<i64> = seen
            .iter()
            .filter(|e| e.kind == EventKind::TimelineEventUpdated)
            .map(|e| e.payload["delta"].as_str().unwrap().parse().unwrap())
            .collect();
        assert!(deltas.windows(2).all(|w| w[0] < w[1]), "no reordering");
    }

    #[tokio::test]
    async fn sessions_do_not_block_each_other() {
        let collector = Collector::new();
        let publisher =
            EventPublisher::spawn(collector.clone(), 512, CancellationToken::new());

        publisher.publish(SessionEvent::session_status("a", SessionStatus::InProgress));
        publisher.publish(SessionEvent::session_status("b", SessionStatus::InProgress));
        publisher.publish(SessionEvent::new(
            tarsy_domain::event::EventKind::SessionStatus,
            "a",
            json!({ "status": "completed" }),
        ));

        let seen = collector.wait_for(3).await;
        let a_frames: Vec<_> = seen.iter().filter(|e| e.session_id == "a").collect();
        assert_eq!(a_frames.len(), 2);
        assert_eq!(a_frames[0].payload["status"], "in_progress");
        assert_eq!(a_frames[1].payload["status"], "completed");
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_frames() {
        let collector = Collector::new();
        let shutdown = CancellationToken::new();
        let publisher = EventPublisher::spawn(collector.clone(), 512, shutdown.clone());

        publisher.publish(SessionEvent::session_status("s1", SessionStatus::Cancelled));
        shutdown.cancel();

        let seen = collector.wait_for(1).await;
        assert_eq!(seen[0].kind, EventKind::SessionStatus);
    }
}
