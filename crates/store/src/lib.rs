//! `tarsy-store` — typed Postgres access for the TARSy audit tree.
//!
//! One [`Store`] facade wraps a `PgPool`; per-entity query modules hang
//! their operations off it as inherent impls. Schema-level invariants
//! (cascades, partial uniques, the chat single-flight index) live in
//! `migrations/`; everything cross-replica goes through SQL, never
//! process memory.

pub mod chats;
pub mod claim;
pub mod interactions;
pub mod models;
pub mod sessions;
pub mod stages;
pub mod timeline;

use sqlx::postgres::{PgPool, PgPoolOptions};

use tarsy_domain::config::DatabaseConfig;
use tarsy_domain::{Error, Result};

pub use claim::{PodLivenessOracle, SingleReplicaOracle};
pub use models::*;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Typed access to the relational database.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Open the pool with the configured limits and bring the schema up
    /// to date. Migrations are monotonic and idempotent — a replica
    /// racing another replica's migration run waits on the sqlx
    /// migration lock.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns.min(config.max_open_conns))
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.conn_max_idle_time)
            .connect(&config.connect_url())
            .await
            .map_err(db_err)?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| Error::Database(format!("migrations: {e}")))?;

        Ok(Self { pool })
    }

    /// Connect by raw URL (tests and tooling); applies migrations.
    pub async fn connect_with_url(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(db_err)?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| Error::Database(format!("migrations: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Cheap liveness probe for `/health`.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Map sqlx errors onto the service taxonomy. Unique violations become
/// `AlreadyExists` so callers can translate them (chat admission turns
/// one into `ChatExecutionActive`).
pub(crate) fn db_err(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::RowNotFound => Error::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::AlreadyExists(db.constraint().unwrap_or("unique constraint").to_string())
        }
        _ => Error::Database(e.to_string()),
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
