use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env_parse;
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retention
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal sessions older than this are soft-deleted by the sweep.
    pub retention_days: u32,
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            sweep_interval: Duration::from_secs(6 * 3600),
        }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            retention_days: env_parse("SESSION_RETENTION_DAYS", defaults.retention_days)?,
            sweep_interval: Duration::from_secs(env_parse(
                "RETENTION_SWEEP_INTERVAL",
                defaults.sweep_interval.as_secs(),
            )?),
        })
    }
}
