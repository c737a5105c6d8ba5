//! # HTTP Surface
//!
//! JSON in, JSON out, under `/api/room/{id}/...`. Public endpoints cover
//! room creation, presence probes, and password management; everything that
//! reads or mutates room state sits behind the password gate in
//! [`middleware`].

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

use std::sync::Arc;

use crate::changesets::ChangesetStore;
use crate::config::ServerConfig;
use crate::database::{ConnectionPool, Result};
use crate::files::FileStore;
use crate::ops::OperationLog;
use crate::rooms::RoomStore;
use crate::state::StateReader;
use crate::sync::{SessionRegistry, SyncEngine};

pub use responses::ApiError;
pub use routes::router;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Room registry
    pub rooms: RoomStore,
    /// File store
    pub files: FileStore,
    /// Delta state reader
    pub reader: StateReader,
    /// Chunked sync engine
    pub sync: SyncEngine,
    /// In-memory sync session registry
    pub sessions: Arc<SessionRegistry>,
    /// Operation log
    pub ops: OperationLog,
    /// Changeset workflow
    pub changesets: ChangesetStore,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Underlying pool, for health checks
    pub db: ConnectionPool,
}

impl AppState {
    /// Wire every store onto one pool.
    pub fn new(pool: ConnectionPool, config: Arc<ServerConfig>) -> Self {
        Self {
            rooms: RoomStore::new(pool.clone()),
            files: FileStore::new(pool.clone()),
            reader: StateReader::new(pool.clone(), config.state_page_size),
            sync: SyncEngine::new(pool.clone()),
            sessions: Arc::new(SessionRegistry::new(config.session_ttl)),
            ops: OperationLog::new(pool.clone(), config.ops_page_size),
            changesets: ChangesetStore::new(pool.clone()),
            config,
            db: pool,
        }
    }

    /// Convenience constructor: open the pool, run migrations, wire stores.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let pool = ConnectionPool::new(crate::database::DatabaseConfig::with_url(
            config.database_url.clone(),
        ))
        .await?;
        crate::database::run_migrations(&pool).await?;
        Ok(Self::new(pool, Arc::new(config)))
    }
}
