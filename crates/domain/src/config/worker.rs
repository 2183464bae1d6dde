use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{env_parse, env_string, ConfigIssue, ConfigSeverity};
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identifies this replica in session claims. Defaults to
    /// `<hostname>-<pid>`.
    pub pod_id: String,
    pub max_workers: usize,
    /// Dispatcher wake interval.
    pub poll_interval: Duration,
    /// Age of an untouched in_progress session before reclaim.
    pub orphan_threshold: Duration,
    /// How long shutdown waits for in-flight workers.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pod_id: default_pod_id(),
            max_workers: 4,
            poll_interval: Duration::from_secs(2),
            orphan_threshold: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn default_pod_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "tarsy".into());
    format!("{host}-{}", std::process::id())
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            pod_id: env_string("POD_ID", &defaults.pod_id),
            max_workers: env_parse("MAX_WORKERS", defaults.max_workers)?.clamp(1, 64),
            poll_interval: Duration::from_secs(env_parse(
                "WORKER_POLL_INTERVAL",
                defaults.poll_interval.as_secs(),
            )?),
            orphan_threshold: Duration::from_secs(env_parse(
                "ORPHAN_THRESHOLD",
                defaults.orphan_threshold.as_secs(),
            )?),
            shutdown_grace: Duration::from_secs(env_parse(
                "SHUTDOWN_GRACE",
                defaults.shutdown_grace.as_secs(),
            )?),
        })
    }

    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.orphan_threshold < self.poll_interval * 4 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "ORPHAN_THRESHOLD".into(),
                message: "close to the poll interval — live sessions may be reclaimed".into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_id_is_unique_per_process() {
        let config = WorkerConfig::default();
        assert!(config.pod_id.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn threshold_near_poll_interval_warns() {
        let config = WorkerConfig {
            poll_interval: Duration::from_secs(60),
            orphan_threshold: Duration::from_secs(120),
            ..WorkerConfig::default()
        };
        let mut issues = Vec::new();
        config.validate(&mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    }
}
