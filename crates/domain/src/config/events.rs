use serde::{Deserialize, Serialize};

use super::env_parse;
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event fan-out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-session publish queue cap; beyond it the oldest streaming
    /// delta is dropped.
    pub session_queue_cap: usize,
    /// Per-WebSocket send buffer; a full buffer disconnects that client.
    pub connection_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            session_queue_cap: 512,
            connection_buffer: 256,
        }
    }
}

impl EventsConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            session_queue_cap: env_parse("EVENT_SESSION_QUEUE_CAP", defaults.session_queue_cap)?
                .max(16),
            connection_buffer: env_parse("WS_CONNECTION_BUFFER", defaults.connection_buffer)?
                .max(16),
        })
    }
}
