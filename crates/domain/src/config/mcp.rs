use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{env_opt, env_parse, ConfigIssue, ConfigSeverity};
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP servers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured MCP tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    /// HTTP endpoint of the server.
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Part of the default tool set offered to agents with no explicit
    /// MCP selection.
    #[serde(default = "d_true")]
    pub default: bool,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Path of the TOML file the servers were loaded from.
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
    /// Health poll cadence; feeds `/health` degradation.
    #[serde(default = "d_health_interval", with = "duration_secs")]
    pub health_poll_interval: Duration,
}

fn d_health_interval() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Deserialize)]
struct McpServersFile {
    #[serde(default)]
    servers: Vec<McpServerConfig>,
}

impl McpConfig {
    /// Read `MCP_SERVERS_CONFIG` (TOML) if set; no file means no MCP
    /// servers, which is a valid deployment.
    pub fn from_env() -> Result<Self> {
        let health_poll_interval =
            Duration::from_secs(env_parse("MCP_HEALTH_POLL_INTERVAL", 30u64)?);
        let Some(path) = env_opt("MCP_SERVERS_CONFIG").map(PathBuf::from) else {
            return Ok(Self {
                config_path: None,
                servers: Vec::new(),
                health_poll_interval,
            });
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("reading MCP servers file {}: {e}", path.display()))
        })?;
        let file: McpServersFile = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing MCP servers file: {e}")))?;

        Ok(Self {
            config_path: Some(path),
            servers: file.servers,
            health_poll_interval,
        })
    }

    /// Server ids in the default tool set.
    pub fn default_server_ids(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|s| s.default)
            .map(|s| s.id.clone())
            .collect()
    }

    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "mcp.servers".into(),
                    message: format!("duplicate server id \"{}\"", server.id),
                });
            }
            if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers.{}", server.id),
                    message: format!("not an http(s) URL: {}", server.url),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_server_ids_flagged() {
        let config = McpConfig {
            config_path: None,
            servers: vec![
                McpServerConfig {
                    id: "kubernetes".into(),
                    url: "http://mcp-k8s:9000".into(),
                    description: None,
                    default: true,
                },
                McpServerConfig {
                    id: "kubernetes".into(),
                    url: "http://mcp-k8s-2:9000".into(),
                    description: None,
                    default: false,
                },
            ],
            health_poll_interval: Duration::from_secs(30),
        };
        let mut issues = Vec::new();
        config.validate(&mut issues);
        assert!(issues.iter().any(|i| i.message.contains("duplicate")));
    }

    #[test]
    fn default_server_ids_filters_non_default() {
        let config = McpConfig {
            config_path: None,
            servers: vec![
                McpServerConfig {
                    id: "a".into(),
                    url: "http://a".into(),
                    description: None,
                    default: true,
                },
                McpServerConfig {
                    id: "b".into(),
                    url: "http://b".into(),
                    description: None,
                    default: false,
                },
            ],
            health_poll_interval: Duration::from_secs(30),
        };
        assert_eq!(config.default_server_ids(), vec!["a".to_string()]);
    }
}
