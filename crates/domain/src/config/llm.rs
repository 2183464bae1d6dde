use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{env_parse, env_string, ConfigIssue, ConfigSeverity};
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM sub-service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Address of the LLM sub-service handling provider calls.
    pub service_url: String,
    /// Backend used when a chain stage has no override.
    pub default_backend: String,
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8085".into(),
            default_backend: "default".into(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            service_url: env_string("LLM_SERVICE_URL", &defaults.service_url),
            default_backend: env_string("LLM_DEFAULT_BACKEND", &defaults.default_backend),
            request_timeout: Duration::from_secs(env_parse(
                "LLM_REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }

    pub(super) fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if !self.service_url.starts_with("http://") && !self.service_url.starts_with("https://") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "LLM_SERVICE_URL".into(),
                message: format!("not an http(s) URL: {}", self.service_url),
            });
        }
    }
}
