use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tarsy_agents::{Masker, McpManager};
use tarsy_domain::chain::ChainRegistry;
use tarsy_domain::config::{Config, ConfigIssue};
use tarsy_store::Store;

use crate::events::{ConnectionManager, EventPublisher, OriginMatcher};
use crate::runtime::{ChatExecutor, WorkerPool};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Snapshots** — config, startup validation issues, chain registry
/// - **Persistence** — the store
/// - **Events** — publisher, connection manager, origin allowlist
/// - **Runtime** — worker pool, chat executor
/// - **Collaborators** — MCP manager, masking
#[derive(Clone)]
pub struct AppState {
    // ── Snapshots ────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub config_issues: Arc<Vec<ConfigIssue>>,
    pub chains: Arc<ChainRegistry>,

    // ── Persistence ──────────────────────────────────────────────────
    pub store: Store,

    // ── Events ───────────────────────────────────────────────────────
    pub publisher: EventPublisher,
    pub connections: Arc<ConnectionManager>,
    pub origins: Arc<OriginMatcher>,

    // ── Runtime ──────────────────────────────────────────────────────
    pub worker_pool: WorkerPool,
    pub chat: ChatExecutor,

    // ── Collaborators ────────────────────────────────────────────────
    pub mcp: Arc<McpManager>,
    pub masker: Arc<Masker>,

    /// Root cancellation token; fires when shutdown begins.
    pub shutdown: CancellationToken,
}
