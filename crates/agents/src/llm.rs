//! HTTP client for the LLM sub-service.
//!
//! The sub-service fronts the actual provider APIs; TARSy only speaks
//! one JSON contract: `POST /v1/complete` with a backend id, messages
//! and tool descriptors, answered by content / thinking / tool calls
//! plus usage. Latency and token counts are captured for the
//! interaction record.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tarsy_domain::agent::{ConversationMessage, ToolCall};
use tarsy_domain::config::LlmConfig;
use tarsy_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub backend: String,
    pub messages: Vec<ConversationMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub content: String,
    /// Model reasoning surfaced on the timeline as `llm_thinking`.
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<i64>,
    #[serde(default)]
    pub output_tokens: Option<i64>,
    /// Filled by the client, not the wire.
    #[serde(skip)]
    pub latency_ms: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

pub struct LlmServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlmServiceClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Llm(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.service_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for LlmServiceClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/complete", self.base_url);
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("llm backend {}", request.backend))
                } else {
                    Error::Llm(format!("request to {url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "backend {} returned {status}: {}",
                request.backend,
                truncate(&body, 500)
            )));
        }

        let mut parsed: LlmResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("decoding response: {e}")))?;
        parsed.latency_ms = started.elapsed().as_millis() as i64;
        Ok(parsed)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_domain::agent::MessageRole;

    #[test]
    fn request_omits_empty_tools() {
        let request = LlmRequest {
            backend: "default".into(),
            messages: vec![ConversationMessage::text(MessageRole::User, "hi")],
            tools: Vec::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("tools"));
    }

    #[test]
    fn response_defaults_tolerate_sparse_bodies() {
        let parsed: LlmResponse = serde_json::from_str(r#"{"content": "done"}"#).unwrap();
        assert_eq!(parsed.content, "done");
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.thinking.is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
