//! WebSocket connection registry and fan-out.
//!
//! Each connection owns a bounded send buffer drained by a dedicated
//! sender task (the channel's receiving half lives in the WS handler).
//! Backpressure is applied per connection only: a client that cannot
//! keep up is disconnected with a policy-violation close; publishers
//! never wait on a socket.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use tarsy_domain::event::SessionEvent;

use super::publisher::EventFanout;

/// Frames pushed to a connection's sender task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// JSON text to write.
    Text(String),
    /// Close the socket: the client fell behind (close code 1008).
    SlowConsumer,
}

struct ConnectionEntry {
    tx: mpsc::Sender<OutboundFrame>,
    subscriptions: HashSet<String>,
}

pub struct ConnectionManager {
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    buffer: usize,
}

impl ConnectionManager {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            buffer,
        }
    }

    /// Register a new connection; the caller wires the receiver to its
    /// sender task.
    pub fn register(&self, conn_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.connections.write().insert(
            conn_id.to_owned(),
            ConnectionEntry {
                tx,
                subscriptions: HashSet::new(),
            },
        );
        rx
    }

    pub fn remove(&self, conn_id: &str) {
        self.connections.write().remove(conn_id);
    }

    pub fn subscribe(&self, conn_id: &str, session_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(conn_id) {
            Some(entry) => {
                entry.subscriptions.insert(session_id.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, conn_id: &str, session_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(conn_id) {
            Some(entry) => entry.subscriptions.remove(session_id),
            None => false,
        }
    }

    /// Push a frame directly to one connection (hello, pong). Returns
    /// false when the connection is gone or its buffer is full.
    pub fn push(&self, conn_id: &str, frame: OutboundFrame) -> bool {
        let connections = self.connections.read();
        match connections.get(conn_id) {
            Some(entry) => entry.tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

impl EventFanout for ConnectionManager {
    fn deliver(&self, event: &SessionEvent) {
        let frame = match serde_json::to_string(&event.to_frame()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event frame");
                return;
            }
        };

        // Collect the laggards under the read lock, evict after.
        let mut slow: Vec<String> = Vec::new();
        {
            let connections = self.connections.read();
            for (conn_id, entry) in connections.iter() {
                if !entry.subscriptions.contains(&event.session_id) {
                    continue;
                }
                match entry.tx.try_send(OutboundFrame::Text(frame.clone())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        slow.push(conn_id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        slow.push(conn_id.clone());
                    }
                }
            }
        }

        for conn_id in slow {
            tracing::warn!(
                conn_id = %conn_id,
                session_id = %event.session_id,
                "dropping slow WebSocket consumer"
            );
            // Best effort: tell the sender task to close with 1008, then
            // forget the connection either way.
            if let Some(entry) = self.connections.read().get(&conn_id) {
                let _ = entry.tx.try_send(OutboundFrame::SlowConsumer);
            }
            self.remove(&conn_id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Origin control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Origin allowlist resolved once at startup.
///
/// Entries ending in `:*` match any port on that host; the port
/// remainder must be digits only so `http://localhost:3000.evil.com`
/// cannot slip past the prefix check.
pub struct OriginMatcher {
    exact: Vec<String>,
    wildcard_prefixes: Vec<String>,
}

impl OriginMatcher {
    pub fn new(origins: &[String]) -> Self {
        let mut exact = Vec::new();
        let mut wildcard_prefixes = Vec::new();
        for origin in origins {
            if let Some(prefix) = origin.strip_suffix('*') {
                wildcard_prefixes.push(prefix.to_owned());
            } else {
                exact.push(origin.clone());
            }
        }
        Self {
            exact,
            wildcard_prefixes,
        }
    }

    /// `None` (no Origin header) is allowed: non-browser clients.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else { return true };
        if self.exact.iter().any(|e| e == origin) {
            return true;
        }
        self.wildcard_prefixes.iter().any(|prefix| {
            origin
                .strip_prefix(prefix.as_str())
                .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_domain::status::SessionStatus;

    #[test]
    fn subscribe_routes_frames_only_to_subscribers() {
        let manager = ConnectionManager::new(16);
        let mut rx_a = manager.register("a");
        let mut rx_b = manager.register("b");
        manager.subscribe("a", "s1");

        manager.deliver(&SessionEvent::session_status("s1", SessionStatus::InProgress));

        let frame = rx_a.try_recv().expect("subscriber receives the frame");
        match frame {
            OutboundFrame::Text(text) => assert!(text.contains("\"session.status\"")),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(rx_b.try_recv().is_err(), "non-subscriber receives nothing");
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let manager = ConnectionManager::new(16);
        let mut rx = manager.register("a");
        manager.subscribe("a", "s1");
        manager.unsubscribe("a", "s1");

        manager.deliver(&SessionEvent::session_status("s1", SessionStatus::Completed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_buffer_evicts_the_slow_connection() {
        let manager = ConnectionManager::new(2);
        let _rx = manager.register("slow");
        manager.subscribe("slow", "s1");

        // Fill the buffer without draining, then overflow it.
        for _ in 0..4 {
            manager.deliver(&SessionEvent::session_status("s1", SessionStatus::InProgress));
        }

        assert_eq!(manager.connection_count(), 0, "slow consumer evicted");
    }

    #[test]
    fn origin_matcher_wildcard_ports() {
        let matcher = OriginMatcher::new(&[
            "http://localhost:*".into(),
            "https://tarsy.example.com".into(),
        ]);
        assert!(matcher.allows(Some("http://localhost:5173")));
        assert!(matcher.allows(Some("https://tarsy.example.com")));
        assert!(matcher.allows(None));
        assert!(!matcher.allows(Some("http://localhost:3000.evil.com")));
        assert!(!matcher.allows(Some("https://evil.example.com")));
    }
}
