use serde::{Deserialize, Serialize};

use super::{env_opt, env_parse, env_string, ConfigIssue, ConfigSeverity};
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Dashboard origin; combined with localhost wildcards for the
    /// WebSocket origin check and CORS.
    pub dashboard_url: Option<String>,
    /// Additional allowed origins (comma list in `EXTRA_ALLOWED_ORIGINS`).
    pub extra_origins: Vec<String>,
    /// Server-wide request body cap in bytes.
    pub body_limit: usize,
    /// In-flight request cap.
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            dashboard_url: None,
            extra_origins: Vec::new(),
            body_limit: 2 * 1024 * 1024,
            max_concurrent_requests: 256,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_string("HTTP_HOST", &defaults.host),
            port: env_parse("HTTP_PORT", defaults.port)?,
            dashboard_url: env_opt("DASHBOARD_URL"),
            extra_origins: env_opt("EXTRA_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            body_limit: env_parse("HTTP_BODY_LIMIT", defaults.body_limit)?,
            max_concurrent_requests: env_parse(
                "HTTP_MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )?,
        })
    }

    /// Origins allowed to open WebSocket connections: the dashboard
    /// origin, localhost on any port, and the extra allowlist.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            "http://localhost:*".to_string(),
            "http://127.0.0.1:*".to_string(),
        ];
        if let Some(ref dashboard) = self.dashboard_url {
            origins.push(dashboard.trim_end_matches('/').to_string());
        }
        origins.extend(self.extra_origins.iter().cloned());
        origins
    }

    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.dashboard_url.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "DASHBOARD_URL".into(),
                message: "not set — only localhost origins may open WebSockets".into(),
            });
        }
        if self.body_limit < 1024 * 1024 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "HTTP_BODY_LIMIT".into(),
                message: "below 1 MiB — alert submissions near the data cap will be rejected"
                    .into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.body_limit, 2 * 1024 * 1024);
    }

    #[test]
    fn allowed_origins_include_localhost_wildcards() {
        let mut config = ServerConfig::default();
        config.dashboard_url = Some("https://tarsy.example.com/".into());
        let origins = config.allowed_origins();
        assert!(origins.contains(&"http://localhost:*".to_string()));
        assert!(origins.contains(&"https://tarsy.example.com".to_string()));
    }
}
