//! `tarsy-agents` — the external-collaborator side of an investigation.
//!
//! This crate holds the HTTP client for the LLM sub-service, the MCP
//! tool-server manager, the masking layer applied to tool results, and
//! the two concrete [`AgentAdapter`] implementations (the investigator
//! and the chat responder). The gateway's runner drives these through
//! the contracts in `tarsy_domain::agent`.

pub mod chat_responder;
pub mod investigator;
pub mod llm;
pub mod masking;
pub mod mcp;

use std::collections::HashMap;
use std::sync::Arc;

use tarsy_domain::agent::AgentAdapter;

pub use chat_responder::ChatResponder;
pub use investigator::InvestigationAgent;
pub use llm::{LlmClient, LlmRequest, LlmResponse, LlmServiceClient};
pub use masking::Masker;
pub use mcp::{McpHealth, McpManager, McpServerHealth};

/// Resolves chain-declared agent names to adapters.
///
/// Investigation agents share one implementation parameterized by the
/// task they receive; only the chat responder differs structurally, so
/// unknown names resolve to the investigator.
pub struct AgentRegistry {
    named: HashMap<String, Arc<dyn AgentAdapter>>,
    fallback: Arc<dyn AgentAdapter>,
}

impl AgentRegistry {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        mcp: Arc<McpManager>,
        masker: Arc<Masker>,
    ) -> Self {
        let investigator: Arc<dyn AgentAdapter> = Arc::new(InvestigationAgent::new(
            llm.clone(),
            mcp.clone(),
            masker.clone(),
        ));
        let responder: Arc<dyn AgentAdapter> = Arc::new(ChatResponder::new(llm));

        let mut named: HashMap<String, Arc<dyn AgentAdapter>> = HashMap::new();
        named.insert("investigator".into(), investigator.clone());
        named.insert(ChatResponder::AGENT_NAME.into(), responder);

        Self {
            named,
            fallback: investigator,
        }
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn AgentAdapter> {
        self.named.get(name).cloned().unwrap_or_else(|| self.fallback.clone())
    }
}
