//! Chain configuration — the ordered investigation pipeline resolved per
//! alert type.
//!
//! Chains are loaded once at startup from a TOML file into an immutable
//! [`ChainRegistry`] snapshot that is passed into constructors (never read
//! globally). Each chain is an ordered list of stages; each stage declares
//! one or more agents and a success policy.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage-level knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Every execution must complete for the stage to complete.
    All,
    /// One completed execution is enough.
    Any,
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelType {
    /// Distinct agents working different angles of the same stage.
    MultiAgent,
    /// Identical inputs; the first completed execution wins and pending
    /// siblings are cancelled.
    Replica,
}

/// One agent declared inside a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRef {
    pub name: String,
    /// LLM backend override for this agent (e.g. "gpt-oss-120b").
    #[serde(default)]
    pub llm_backend: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain / stage config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub agents: Vec<AgentRef>,
    #[serde(default)]
    pub success_policy: SuccessPolicy,
    #[serde(default)]
    pub parallel: Option<ParallelType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: String,
    /// Alert types routed to this chain.
    #[serde(default)]
    pub alert_types: Vec<String>,
    pub stages: Vec<StageConfig>,
    /// Follow-up chat against terminal sessions of this chain.
    #[serde(default = "d_true")]
    pub chat_enabled: bool,
    /// Whole-session budget in seconds.
    #[serde(default = "d_session_timeout")]
    pub session_timeout_sec: u64,
    /// Per-stage budget in seconds.
    #[serde(default = "d_stage_timeout")]
    pub stage_timeout_sec: u64,
}

fn d_true() -> bool {
    true
}
fn d_session_timeout() -> u64 {
    1_800
}
fn d_stage_timeout() -> u64 {
    600
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ChainsFile {
    #[serde(default)]
    default_chain: Option<String>,
    #[serde(default)]
    chains: Vec<ChainConfig>,
}

/// Immutable chain lookup built once at startup.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    by_id: HashMap<String, ChainConfig>,
    by_alert_type: HashMap<String, String>,
    default_chain: Option<String>,
}

impl ChainRegistry {
    pub fn from_chains(chains: Vec<ChainConfig>, default_chain: Option<String>) -> Result<Self> {
        let mut by_id = HashMap::new();
        let mut by_alert_type = HashMap::new();

        for chain in chains {
            if chain.stages.is_empty() {
                return Err(Error::Config(format!(
                    "chain \"{}\" declares no stages",
                    chain.id
                )));
            }
            for stage in &chain.stages {
                if stage.agents.is_empty() {
                    return Err(Error::Config(format!(
                        "chain \"{}\" stage \"{}\" declares no agents",
                        chain.id, stage.name
                    )));
                }
            }
            for alert_type in &chain.alert_types {
                if let Some(previous) =
                    by_alert_type.insert(alert_type.clone(), chain.id.clone())
                {
                    return Err(Error::Config(format!(
                        "alert type \"{alert_type}\" is claimed by both \"{previous}\" and \"{}\"",
                        chain.id
                    )));
                }
            }
            if by_id.insert(chain.id.clone(), chain).is_some() {
                return Err(Error::Config("duplicate chain id".into()));
            }
        }

        if let Some(ref id) = default_chain {
            if !by_id.contains_key(id) {
                return Err(Error::Config(format!(
                    "default_chain \"{id}\" is not a defined chain"
                )));
            }
        }

        Ok(Self {
            by_id,
            by_alert_type,
            default_chain,
        })
    }

    /// Load the registry from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("reading chains file {}: {e}", path.display()))
        })?;
        let file: ChainsFile = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing chains file: {e}")))?;
        Self::from_chains(file.chains, file.default_chain)
    }

    /// Resolve the chain for an alert type, falling back to the default
    /// chain when the type is unknown.
    pub fn resolve(&self, alert_type: &str) -> Option<&ChainConfig> {
        self.by_alert_type
            .get(alert_type)
            .or(self.default_chain.as_ref())
            .and_then(|id| self.by_id.get(id))
    }

    pub fn get(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.by_id.get(chain_id)
    }

    /// Alert types with an explicit chain mapping.
    pub fn alert_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_alert_type.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chain(id: &str, alert_types: &[&str]) -> ChainConfig {
        ChainConfig {
            id: id.into(),
            alert_types: alert_types.iter().map(|s| s.to_string()).collect(),
            stages: vec![StageConfig {
                name: "analyze".into(),
                agents: vec![AgentRef {
                    name: "investigator".into(),
                    llm_backend: None,
                }],
                success_policy: SuccessPolicy::All,
                parallel: None,
            }],
            chat_enabled: true,
            session_timeout_sec: 1_800,
            stage_timeout_sec: 600,
        }
    }

    #[test]
    fn resolve_by_alert_type() {
        let registry =
            ChainRegistry::from_chains(vec![chain("k8s", &["KubernetesPodOOM"])], None).unwrap();
        assert_eq!(registry.resolve("KubernetesPodOOM").unwrap().id, "k8s");
        assert!(registry.resolve("unknown").is_none());
    }

    #[test]
    fn unknown_alert_type_falls_back_to_default() {
        let registry = ChainRegistry::from_chains(
            vec![chain("k8s", &["KubernetesPodOOM"]), chain("generic", &[])],
            Some("generic".into()),
        )
        .unwrap();
        assert_eq!(registry.resolve("SomethingElse").unwrap().id, "generic");
    }

    #[test]
    fn duplicate_alert_type_rejected() {
        let err = ChainRegistry::from_chains(
            vec![chain("a", &["X"]), chain("b", &["X"])],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("claimed by both"));
    }

    #[test]
    fn empty_stage_list_rejected() {
        let mut bad = chain("a", &[]);
        bad.stages.clear();
        assert!(ChainRegistry::from_chains(vec![bad], None).is_err());
    }

    #[test]
    fn load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_chain = "kubernetes"

[[chains]]
id = "kubernetes"
alert_types = ["KubernetesPodOOM", "KubernetesPodCrashLoop"]

[[chains.stages]]
name = "data-collection"
agents = [{{ name = "collector" }}, {{ name = "log-reader" }}]
success_policy = "any"
parallel = "multi_agent"

[[chains.stages]]
name = "analysis"
agents = [{{ name = "investigator", llm_backend = "default" }}]
"#
        )
        .unwrap();

        let registry = ChainRegistry::load(file.path()).unwrap();
        let chain = registry.resolve("KubernetesPodOOM").unwrap();
        assert_eq!(chain.id, "kubernetes");
        assert_eq!(chain.stages.len(), 2);
        assert_eq!(chain.stages[0].success_policy, SuccessPolicy::Any);
        assert_eq!(chain.stages[0].parallel, Some(ParallelType::MultiAgent));
        assert_eq!(chain.stages[1].success_policy, SuccessPolicy::All);
        assert!(chain.chat_enabled);
    }
}
