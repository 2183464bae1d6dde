//! MCP (Model Context Protocol) tool-server manager.
//!
//! Holds the configured server registry, dispatches tool calls over
//! HTTP, and keeps a health snapshot refreshed by a background poll.
//! The health snapshot feeds `/health` degradation and
//! `/api/v1/system/mcp-servers`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tarsy_domain::config::{McpConfig, McpServerConfig};
use tarsy_domain::{Error, Result};

use crate::llm::ToolDescriptor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct McpServerHealth {
    pub server_id: String,
    pub healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpHealth {
    pub healthy: bool,
    pub servers: Vec<McpServerHealth>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct McpManager {
    http: reqwest::Client,
    servers: HashMap<String, McpServerConfig>,
    health: RwLock<HashMap<String, McpServerHealth>>,
    poll_interval: Duration,
}

impl McpManager {
    /// A manager with no servers — valid when MCP is unconfigured.
    pub fn empty() -> Self {
        Self {
            http: reqwest::Client::new(),
            servers: HashMap::new(),
            health: RwLock::new(HashMap::new()),
            poll_interval: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &McpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Mcp(format!("building HTTP client: {e}")))?;

        let mut servers = HashMap::new();
        let mut health = HashMap::new();
        for server in &config.servers {
            health.insert(
                server.id.clone(),
                McpServerHealth {
                    server_id: server.id.clone(),
                    healthy: false,
                    last_checked: None,
                    error: None,
                },
            );
            servers.insert(server.id.clone(), server.clone());
        }

        Ok(Self {
            http,
            servers,
            health: RwLock::new(health),
            poll_interval: config.health_poll_interval,
        })
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Invoke one tool. `mcp_selection` scoping is the caller's job;
    /// asking for an unconfigured server is an error, not a retry.
    pub async fn call_tool(&self, server_id: &str, tool: &str, arguments: Value) -> Result<Value> {
        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| Error::Mcp(format!("unknown MCP server \"{server_id}\"")))?;

        let url = format!("{}/invoke", server.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "tool": tool, "arguments": arguments }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("mcp server {server_id}"))
                } else {
                    Error::Mcp(format!("{server_id}/{tool}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Mcp(format!("{server_id}/{tool} returned {status}")));
        }

        let invoke: InvokeResponse = response
            .json()
            .await
            .map_err(|e| Error::Mcp(format!("{server_id}/{tool}: decoding response: {e}")))?;
        if let Some(error) = invoke.error {
            return Err(Error::Mcp(format!("{server_id}/{tool}: {error}")));
        }
        Ok(invoke.result)
    }

    /// Discover the tools a set of servers offers (`None` = all).
    pub async fn list_tools(&self, selection: Option<&[String]>) -> Vec<ToolDescriptor> {
        let mut tools = Vec::new();
        for (id, server) in &self.servers {
            if let Some(selected) = selection {
                if !selected.iter().any(|s| s == id) {
                    continue;
                }
            }
            let url = format!("{}/tools", server.url.trim_end_matches('/'));
            match self.fetch_tools(&url, id).await {
                Ok(mut found) => tools.append(&mut found),
                Err(e) => {
                    tracing::warn!(server_id = %id, error = %e, "MCP tool discovery failed");
                }
            }
        }
        tools
    }

    async fn fetch_tools(&self, url: &str, server_id: &str) -> Result<Vec<ToolDescriptor>> {
        #[derive(Deserialize)]
        struct ToolsResponse {
            #[serde(default)]
            tools: Vec<ToolEntry>,
        }
        #[derive(Deserialize)]
        struct ToolEntry {
            name: String,
            #[serde(default)]
            description: String,
            #[serde(default)]
            input_schema: Value,
        }

        let response: ToolsResponse = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Mcp(format!("{server_id}: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Mcp(format!("{server_id}: decoding tools: {e}")))?;

        Ok(response
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                server: server_id.to_string(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect())
    }

    /// Current health snapshot. A manager with no servers is healthy.
    pub fn health(&self) -> McpHealth {
        let health = self.health.read();
        let mut servers: Vec<McpServerHealth> = health.values().cloned().collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        McpHealth {
            healthy: servers.iter().all(|s| s.healthy),
            servers,
        }
    }

    /// Poll every server's `/healthz` once and update the snapshot.
    pub async fn poll_health_once(&self) {
        for (id, server) in &self.servers {
            let url = format!("{}/healthz", server.url.trim_end_matches('/'));
            let started = Instant::now();
            let outcome = self.http.get(&url).send().await;
            let (healthy, error) = match outcome {
                Ok(r) if r.status().is_success() => (true, None),
                Ok(r) => (false, Some(format!("status {}", r.status()))),
                Err(e) => (false, Some(e.to_string())),
            };
            tracing::debug!(
                server_id = %id,
                healthy,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "MCP health poll"
            );
            let mut health = self.health.write();
            health.insert(
                id.clone(),
                McpServerHealth {
                    server_id: id.clone(),
                    healthy,
                    last_checked: Some(Utc::now()),
                    error,
                },
            );
        }
    }

    /// Background health loop; lives until `shutdown` fires.
    pub fn spawn_health_loop(manager: Arc<Self>, shutdown: CancellationToken) {
        if manager.servers.is_empty() {
            return;
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.poll_health_once().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_is_healthy() {
        let manager = McpManager::empty();
        assert!(manager.health().healthy);
        assert_eq!(manager.server_count(), 0);
    }

    #[tokio::test]
    async fn unknown_server_is_an_error() {
        let manager = McpManager::empty();
        let err = manager
            .call_tool("ghost", "read", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown MCP server"));
    }

    #[test]
    fn unpolled_servers_report_unhealthy() {
        let config = McpConfig {
            config_path: None,
            servers: vec![McpServerConfig {
                id: "kubernetes".into(),
                url: "http://mcp-k8s:9000".into(),
                description: None,
                default: true,
            }],
            health_poll_interval: Duration::from_secs(30),
        };
        let manager = McpManager::from_config(&config).unwrap();
        let health = manager.health();
        assert!(!health.healthy);
        assert_eq!(health.servers.len(), 1);
        assert!(health.servers[0].last_checked.is_none());
    }
}
