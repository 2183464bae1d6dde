//! Service configuration — an immutable snapshot read from the
//! environment once at startup and passed into constructors.
//!
//! Chain and MCP-server definitions come from TOML files referenced by
//! env vars; everything else is plain env keys (see each module).

mod database;
mod events;
mod llm;
mod mcp;
mod retention;
mod server;
mod worker;

pub use database::*;
pub use events::*;
pub use llm::*;
pub use mcp::*;
pub use retention::*;
pub use server::*;
pub use worker::*;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// TOML file defining the investigation chains (`CHAINS_CONFIG`).
    #[serde(default)]
    pub chains_path: Option<std::path::PathBuf>,
    /// Static runbook catalogue exposed on `/api/v1/runbooks`
    /// (`RUNBOOKS`, comma list of URLs).
    #[serde(default)]
    pub runbooks: Vec<String>,
}

impl Config {
    /// Build the full snapshot from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
            events: EventsConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            mcp: McpConfig::from_env()?,
            retention: RetentionConfig::from_env()?,
            chains_path: env_opt("CHAINS_CONFIG").map(std::path::PathBuf::from),
            runbooks: env_opt("RUNBOOKS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Collect non-fatal configuration issues; surfaced at startup and
    /// on `/api/v1/system/warnings`.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        self.server.validate(&mut issues);
        self.database.validate(&mut issues);
        self.worker.validate(&mut issues);
        self.llm.validate(&mut issues);
        self.mcp.validate(&mut issues);
        if self.chains_path.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "CHAINS_CONFIG".into(),
                message: "not set — only the built-in default chain is available".into(),
            });
        }
        issues
    }

    /// Redacted summary reported by `GET /health`.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "http_port": self.server.port,
            "max_workers": self.worker.max_workers,
            "poll_interval_sec": self.worker.poll_interval.as_secs(),
            "orphan_threshold_sec": self.worker.orphan_threshold.as_secs(),
            "db_host": self.database.host,
            "db_name": self.database.name,
            "llm_service_url": self.llm.service_url,
            "mcp_servers": self.mcp.servers.len(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// ── env reading helpers (crate-internal) ────────────────────────────

pub(crate) fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}"))),
        Err(_) => Ok(default),
    }
}
