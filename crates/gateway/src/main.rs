use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tarsy_agents::{AgentRegistry, LlmServiceClient, Masker, McpManager};
use tarsy_domain::chain::{AgentRef, ChainConfig, ChainRegistry, StageConfig, SuccessPolicy};
use tarsy_domain::config::{Config, ConfigSeverity};
use tarsy_gateway::api;
use tarsy_gateway::events::{ConnectionManager, EventPublisher, OriginMatcher};
use tarsy_gateway::runtime::{ChatExecutor, InvestigationRunner, WorkerPool};
use tarsy_gateway::state::AppState;
use tarsy_store::{SingleReplicaOracle, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env().context("loading configuration")?);
    run_server(config).await
}

/// Structured JSON tracing; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tarsy_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "TARSy starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store (pool + migrations) ────────────────────────────────────
    let store = Store::connect(&config.database)
        .await
        .context("connecting to the database")?;
    tracing::info!(
        host = %config.database.host,
        name = %config.database.name,
        "database ready"
    );

    // ── Chain registry ───────────────────────────────────────────────
    let chains = Arc::new(match &config.chains_path {
        Some(path) => {
            let registry = ChainRegistry::load(path).context("loading chains config")?;
            tracing::info!(path = %path.display(), chains = registry.len(), "chain registry ready");
            registry
        }
        None => {
            tracing::warn!("CHAINS_CONFIG not set — using the built-in default chain");
            builtin_default_registry().context("building default chain")?
        }
    });

    // ── Shutdown root ────────────────────────────────────────────────
    let shutdown = CancellationToken::new();

    // ── External collaborators ───────────────────────────────────────
    let llm = Arc::new(
        LlmServiceClient::from_config(&config.llm).context("initializing LLM client")?,
    );
    tracing::info!(url = %config.llm.service_url, "LLM service client ready");

    let mcp = Arc::new(McpManager::from_config(&config.mcp).context("initializing MCP manager")?);
    McpManager::spawn_health_loop(mcp.clone(), shutdown.clone());
    tracing::info!(servers = mcp.server_count(), "MCP manager ready");

    let masker = Arc::new(Masker::new().context("compiling masking patterns")?);
    let agents = Arc::new(AgentRegistry::new(llm.clone(), mcp.clone(), masker.clone()));
    tracing::info!("agent registry ready");

    // ── Event fan-out ────────────────────────────────────────────────
    let connections = Arc::new(ConnectionManager::new(config.events.connection_buffer));
    let publisher = EventPublisher::spawn(
        connections.clone(),
        config.events.session_queue_cap,
        shutdown.clone(),
    );
    let origins = Arc::new(OriginMatcher::new(&config.server.allowed_origins()));
    tracing::info!(
        queue_cap = config.events.session_queue_cap,
        connection_buffer = config.events.connection_buffer,
        "event publisher + connection manager ready"
    );

    // ── Runner + worker pool ─────────────────────────────────────────
    let runner = InvestigationRunner::new(
        store.clone(),
        publisher.clone(),
        agents.clone(),
        chains.clone(),
        llm.clone(),
        config.llm.default_backend.clone(),
    );
    let oracle = Arc::new(SingleReplicaOracle {
        self_pod_id: config.worker.pod_id.clone(),
    });
    let worker_pool = WorkerPool::new(
        store.clone(),
        runner,
        config.worker.clone(),
        Arc::new(tarsy_gateway::runtime::CancelMap::new()),
        oracle,
    );
    worker_pool.start();

    // ── Chat executor ────────────────────────────────────────────────
    let chat = ChatExecutor::new(
        store.clone(),
        publisher.clone(),
        agents,
        chains.clone(),
        shutdown.clone(),
        config.llm.default_backend.clone(),
    );
    tracing::info!("chat executor ready");

    // ── Retention sweep ──────────────────────────────────────────────
    {
        let store = store.clone();
        let retention = config.retention.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(retention.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                match store.soft_delete_expired(retention.retention_days).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(sessions = n, "retention sweep soft-deleted sessions"),
                    Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                }
            }
        });
    }

    // ── App state + router ───────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        config_issues: Arc::new(issues),
        chains,
        store,
        publisher,
        connections,
        origins,
        worker_pool: worker_pool.clone(),
        chat: chat.clone(),
        mcp,
        masker,
        shutdown: shutdown.clone(),
    };
    let app = api::router(&state).with_state(state);

    // ── Bind + serve ─────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "TARSy listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("axum server error")?;

    // In-flight HTTP requests have drained; stop the investigation
    // machinery and hand unfinished sessions back to the queue.
    worker_pool.shutdown().await;
    chat.shutdown(config.worker.shutdown_grace).await;
    tracing::info!("TARSy stopped");
    Ok(())
}

/// The single built-in chain used when no chains file is configured:
/// one investigation stage with one agent, chat enabled.
fn builtin_default_registry() -> tarsy_domain::Result<ChainRegistry> {
    ChainRegistry::from_chains(
        vec![ChainConfig {
            id: "default".into(),
            alert_types: Vec::new(),
            stages: vec![StageConfig {
                name: "investigation".into(),
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
        }],
        Some("default".into()),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
