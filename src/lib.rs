//! # LivePaste Server
//!
//! Server-side backing store for a zero-knowledge, browser-hosted
//! collaborative code editor. The browser encrypts every byte of user
//! content client-side; this server stores opaque ciphertext blobs and
//! coordinates their storage and versioning across concurrent clients
//! sharing a room.
//!
//! ## Architecture
//!
//! - `database`: sqlx/SQLite pool, migrations, transactional writes
//! - `rooms`: lazy room registry, version counters, retention sweep
//! - `auth`: Argon2id hashing for the optional per-room password
//! - `files`: encrypted file upsert/delete with tombstone tracking
//! - `state`: paginated `since`-based delta reads
//! - `sync`: chunked upload sessions with completion reconciliation
//! - `ops`: sequenced edit deltas with optimistic conflict detection
//! - `changesets`: proposed-change review with per-change accept/reject
//! - `api`: axum router, handlers, and the room password gate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod changesets;
pub mod config;
pub mod database;
pub mod files;
pub mod ops;
pub mod rooms;
pub mod state;
pub mod sync;

pub use api::{router, AppState};
pub use config::ServerConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
