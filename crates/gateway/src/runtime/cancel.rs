//! Per-session cancellation tokens.
//!
//! Each claimed session (and each live chat execution) registers a
//! `CancellationToken` here so a cancel request routed to this pod can
//! reach the task actually doing the work. Cancelling an id not present
//! on this pod is a no-op — the DB-side `cancelling` transition covers
//! the replica that owns it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a session. The token is a child
    /// of `parent` so pool shutdown cancels every registered session.
    pub fn register(&self, session_id: &str, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the local work for a session. Returns true if a token was
    /// present.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token once the work finished.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove_lifecycle() {
        let map = CancelMap::new();
        let parent = CancellationToken::new();

        let token = map.register("s1", &parent);
        assert!(map.is_running("s1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }

    #[test]
    fn parent_cancellation_reaches_all_sessions() {
        let map = CancelMap::new();
        let parent = CancellationToken::new();

        let t1 = map.register("s1", &parent);
        let t2 = map.register("s2", &parent);

        parent.cancel();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn cancel_unknown_session_is_a_noop() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let parent = CancellationToken::new();

        let old = map.register("s1", &parent);
        let new = map.register("s1", &parent);

        map.cancel("s1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
