//! # Chunked Sync Manager
//!
//! Bulk folder uploads arrive split into small chunks so they pass through
//! payload-inspecting proxies. Each chunk upserts its files in one
//! transaction with a single room-version bump; completion reconciles the
//! room against the set of path hashes observed across the whole session,
//! deleting everything the client no longer has and tombstoning each
//! deletion at the post-reconciliation room version.

pub mod session;

use std::collections::HashSet;

use sqlx::QueryBuilder;
use thiserror::Error;

use crate::database::{ConnectionPool, DatabaseError};
use crate::files::{self, FileError, UpsertFileRequest};
use crate::rooms;

pub use session::{ChunkProgress, SessionError, SessionRegistry, SyncSession};

/// Rows touched per statement during reconciliation.
const RECONCILE_BATCH: usize = 200;

/// Sync engine error types
#[derive(Debug, Error)]
pub enum SyncError {
    /// Caller-correctable request problem
    #[error("{0}")]
    Validation(String),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(DatabaseError::Sqlx(e))
    }
}

impl From<FileError> for SyncError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Validation(msg) => SyncError::Validation(msg),
            FileError::Database(db) => SyncError::Database(db),
        }
    }
}

/// Applies chunk uploads and completion reconciliation.
#[derive(Clone)]
pub struct SyncEngine {
    pool: ConnectionPool,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Upsert one chunk's files in a single transaction with a single
    /// room-version bump. Returns the new room version.
    pub async fn apply_chunk(
        &self,
        room_id: &str,
        files_in_chunk: &[UpsertFileRequest],
    ) -> Result<i64, SyncError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;
        for request in files_in_chunk {
            files::upsert_in_tx(&mut tx, room_id, request, room_version).await?;
        }
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(room_version)
    }

    /// Delete every file in the room whose path hash was not observed during
    /// the session, tombstoning each at the post-reconciliation version.
    /// Bumps the room version once, and only when something is deleted.
    /// Returns the deleted path hashes.
    pub async fn reconcile(
        &self,
        room_id: &str,
        observed: &HashSet<String>,
    ) -> Result<Vec<String>, SyncError> {
        // Cheap pre-check outside any transaction: most completions have
        // nothing to reconcile and must not bump the version.
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT path_hash FROM files WHERE room_id = ?1")
                .bind(room_id)
                .fetch_all(self.pool.pool())
                .await?;
        if existing.iter().all(|hash| observed.contains(hash)) {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;

        // Re-read under the write lock; the pre-check may have raced a chunk.
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, path_hash FROM files WHERE room_id = ?1")
                .bind(room_id)
                .fetch_all(&mut *tx)
                .await?;
        let doomed: Vec<(String, String)> = rows
            .into_iter()
            .filter(|(_, hash)| !observed.contains(hash))
            .collect();

        if doomed.is_empty() {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(Vec::new());
        }

        for batch in doomed.chunks(RECONCILE_BATCH) {
            let mut delete = QueryBuilder::<sqlx::Sqlite>::new("DELETE FROM files WHERE id IN (");
            let mut ids = delete.separated(", ");
            for (id, _) in batch {
                ids.push_bind(id);
            }
            delete.push(")");
            delete.build().execute(&mut *tx).await?;

            let mut tombstones = QueryBuilder::<sqlx::Sqlite>::new(
                "INSERT INTO deleted_files (room_id, path_hash, deleted_at_version, deleted_at) ",
            );
            tombstones.push_values(batch, |mut row, (_, hash)| {
                row.push_bind(room_id)
                    .push_bind(hash)
                    .push_bind(room_version)
                    .push_bind(chrono::Utc::now());
            });
            tombstones.build().execute(&mut *tx).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;

        let deleted: Vec<String> = doomed.into_iter().map(|(_, hash)| hash).collect();
        tracing::debug!(
            room = room_id,
            deleted = deleted.len(),
            version = room_version,
            "sync reconciliation"
        );
        Ok(deleted)
    }
}
