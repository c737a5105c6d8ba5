//! # Connection Pool Management
//!
//! Provides async connection pooling over SQLite with WAL journaling,
//! busy-timeout handling, and foreign-key enforcement.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};

use crate::database::{DatabaseError, Result};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g. "sqlite://livepaste.db?mode=rwc")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    pub connect_timeout: u64,

    /// Busy timeout for SQLite in milliseconds
    pub busy_timeout: u64,

    /// Enable WAL mode
    pub enable_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://livepaste.db?mode=rwc".to_string(),
            max_connections: 16,
            connect_timeout: 30,
            busy_timeout: 5000,
            enable_wal: true,
        }
    }
}

impl DatabaseConfig {
    /// Configuration pointing at the given URL, other knobs defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Pooled SQLite handle shared by every store.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: SqlitePool,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let mut connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout));

        if config.enable_wal {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory pool, for tests.
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Access the underlying sqlx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Verify the database answers a trivial query.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close all connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
