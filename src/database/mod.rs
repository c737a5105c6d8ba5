//! # Database Layer
//!
//! Persistence for the room store, built on sqlx/SQLite:
//!
//! - Async connection pooling with WAL journaling and busy-timeout handling
//! - Embedded schema migrations with a `_migrations` bookkeeping table
//! - Transactional writes; every mutation is wrapped in an explicit
//!   transaction that is rolled back on error
//!
//! SQLite serializes writers at the database level. Mutating transactions
//! issue their room-version bump `UPDATE` as the first statement, which
//! acquires the write lock up front and totally orders concurrent mutations
//! on the same room.

use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Connection pool error
    #[error("connection pool error: {0}")]
    ConnectionPool(String),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// SQLx error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

pub mod connection_pool;
pub mod migrations;

pub use connection_pool::{ConnectionPool, DatabaseConfig};
pub use migrations::run_migrations;
