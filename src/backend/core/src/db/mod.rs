//! Database layer for Offertory.
//!
//! Uses PostgreSQL for persistent storage with sqlx. The pool lives behind
//! a swap lock so the watchdog can tear the connection down and rebuild it
//! without handing out a stale handle.

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, OffertoryError, Result};

/// Tables the platform cannot operate without. Probed by the startup gate's
/// schema-integrity step.
pub const CRITICAL_TABLES: &[&str] = &[
    "donations",
    "recordings",
    "transcripts",
    "drafts",
    "incidents",
];

/// Timeout applied to connectivity pings.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection handle.
///
/// Shared behind an `Arc`; every holder sees the same pool slot, so a
/// reconnect through any handle is observed everywhere.
pub struct Database {
    url: String,
    max_connections: u32,
    min_connections: u32,
    pool: RwLock<PgPool>,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = Self::build_pool(&config.url, config.max_connections, config.min_connections)
            .await?;

        Ok(Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            pool: RwLock::new(pool),
        })
    }

    /// Create a handle whose pool connects on first use. Useful when a
    /// component needs a [`Database`] before connectivity is proven.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&config.url)
            .map_err(|e| {
                OffertoryError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Invalid database connection string",
                    e.to_string(),
                )
            })?;

        Ok(Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            pool: RwLock::new(pool),
        })
    }

    async fn build_pool(url: &str, max: u32, min: u32) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(max)
            .min_connections(min)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| {
                OffertoryError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Could not connect to the database",
                    e.to_string(),
                )
            })
    }

    /// Get the current connection pool.
    pub fn pool(&self) -> PgPool {
        self.pool.read().clone()
    }

    /// Execute a trivial query to verify connectivity, bounded by
    /// [`PING_TIMEOUT`]. Returns the observed round-trip latency.
    pub async fn ping(&self) -> Result<Duration> {
        let pool = self.pool();
        let start = Instant::now();

        let query = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pool);
        match tokio::time::timeout(PING_TIMEOUT, query).await {
            Ok(Ok(_)) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(OffertoryError::from(e)),
            Err(_) => Err(OffertoryError::with_internal(
                ErrorCode::DatabaseConnectionFailed,
                "Database ping timed out",
                format!("no response within {:?}", PING_TIMEOUT),
            )),
        }
    }

    /// Tear down the current pool and establish a fresh one.
    ///
    /// Used by the watchdog's reconnect sequence. The old pool is closed
    /// only after the replacement is in place so concurrent readers never
    /// observe a closed pool.
    pub async fn reconnect(&self) -> Result<()> {
        let fresh =
            Self::build_pool(&self.url, self.max_connections, self.min_connections).await?;

        let old = {
            let mut slot = self.pool.write();
            std::mem::replace(&mut *slot, fresh)
        };
        old.close().await;
        info!("Database pool rebuilt");
        Ok(())
    }

    /// Verify that every critical table exists.
    pub async fn verify_schema(&self, tables: &[&str]) -> Result<()> {
        let pool = self.pool();
        let expected: Vec<String> = tables.iter().map(|t| t.to_string()).collect();

        let present: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name = ANY($1)",
        )
        .bind(&expected)
        .fetch_all(&pool)
        .await?;

        let missing: Vec<&str> = tables
            .iter()
            .copied()
            .filter(|t| !present.iter().any(|p| p == t))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            warn!(missing = ?missing, "Schema integrity check failed");
            Err(OffertoryError::with_internal(
                ErrorCode::SchemaIntegrityFailed,
                "Database schema is missing critical tables",
                format!("missing tables: {}", missing.join(", ")),
            ))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimal view of the persistent store used by the runtime watchdog.
///
/// The watchdog only pings and reconnects; expressing that as a trait keeps
/// its state machine testable with scripted fakes.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Bounded connectivity check. Returns latency on success, an error
    /// description on failure.
    async fn ping(&self) -> std::result::Result<Duration, String>;

    /// Tear down and re-establish the store connection.
    async fn reconnect(&self) -> std::result::Result<(), String>;
}

#[async_trait]
impl StoreHandle for Database {
    async fn ping(&self) -> std::result::Result<Duration, String> {
        Database::ping(self).await.map_err(|e| e.to_string())
    }

    async fn reconnect(&self) -> std::result::Result<(), String> {
        Database::reconnect(self).await.map_err(|e| e.to_string())
    }
}
