//! # Operation Log
//!
//! Per-keystroke edit deltas, opaque to the server, totally ordered within a
//! room by `seq`. Submission runs an optimistic-concurrency check: a client
//! editing a stale file version whose file has ops from other clients past
//! the last snapshot gets the conflicting ops back and rebases locally — the
//! server performs no transformation.
//!
//! Clients periodically compact a file by uploading a materialized body
//! (snapshot) and pruning the ops it covers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::{ConnectionPool, DatabaseError};
use crate::rooms;

/// Operation log error types
#[derive(Debug, Error)]
pub enum OpError {
    /// Caller-correctable request problem
    #[error("{0}")]
    Validation(String),

    /// The submission raced a concurrent writer on the same file
    #[error("operation conflicts with {} concurrent ops", conflicting_ops.len())]
    Conflict {
        /// File version after the concurrent writes
        current_version: i64,
        /// Version the submitting client was editing against
        base_version: i64,
        /// Ops the client must rebase onto
        conflicting_ops: Vec<ConflictingOp>,
    },

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for OpError {
    fn from(e: sqlx::Error) -> Self {
        OpError::Database(DatabaseError::Sqlx(e))
    }
}

/// Submission request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOpRequest {
    /// Path hash of the file being edited
    pub file_path_hash: String,
    /// Ciphertext of the edit delta
    pub op_encrypted: String,
    /// Submitting client
    pub client_id: String,
    /// File version the client believed it was editing; absent to skip the
    /// conflict check
    #[serde(default)]
    pub base_version: Option<i64>,
}

/// Successful submission.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubmitOpResponse {
    /// Sequence assigned to the operation
    pub seq: i64,
    /// File version after the submission
    pub current_version: i64,
}

/// A stored operation, as returned to fetching clients.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OperationRecord {
    /// Per-room sequence
    pub seq: i64,
    /// Path hash of the edited file
    pub file_path_hash: String,
    /// Ciphertext of the edit delta
    pub op_encrypted: String,
    /// Submitting client
    pub client_id: String,
    /// File version the client edited against
    pub base_version: i64,
}

/// An op handed back to a conflicting submitter for rebasing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConflictingOp {
    /// Per-room sequence
    pub seq: i64,
    /// Ciphertext of the edit delta
    pub op_encrypted: String,
    /// Client that submitted it
    pub client_id: String,
}

/// A fetched page of operations.
#[derive(Debug, Clone, Serialize)]
pub struct OpsPage {
    /// Operations with `seq` past the caller's cursor, ascending
    pub ops: Vec<OperationRecord>,
    /// Current room operation sequence
    pub op_seq: i64,
    /// True iff another page may exist
    pub has_more: bool,
}

/// Snapshot compaction result.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotResponse {
    /// File version after the snapshot
    pub version: i64,
    /// Operation sequence the body now covers
    pub snapshot_seq: i64,
    /// Room version after the snapshot
    pub room_version: i64,
}

/// Store for the operation log.
#[derive(Clone)]
pub struct OperationLog {
    pool: ConnectionPool,
    page_size: i64,
}

impl OperationLog {
    /// Create a new operation log
    pub fn new(pool: ConnectionPool, page_size: i64) -> Self {
        Self { pool, page_size }
    }

    /// Submit one operation. The whole protocol runs in a single
    /// transaction whose first statement advances the room counters, so
    /// concurrent submissions serialize and receive strictly increasing
    /// `seq` values; a conflict rolls everything back.
    pub async fn submit(
        &self,
        room_id: &str,
        request: &SubmitOpRequest,
    ) -> Result<SubmitOpResponse, OpError> {
        if request.file_path_hash.is_empty() {
            return Err(OpError::Validation("file_path_hash is required".into()));
        }
        if request.op_encrypted.is_empty() {
            return Err(OpError::Validation("op_encrypted is required".into()));
        }
        if request.client_id.is_empty() {
            return Err(OpError::Validation("client_id is required".into()));
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let (room_version, seq) = rooms::bump_version_and_op_seq(&mut tx, room_id).await?;

        let file: Option<(i64, i64)> = sqlx::query_as(
            "SELECT version, snapshot_seq FROM files WHERE room_id = ?1 AND path_hash = ?2",
        )
        .bind(room_id)
        .bind(&request.file_path_hash)
        .fetch_optional(&mut *tx)
        .await?;
        let (file_version, snapshot_seq) = file.unwrap_or((0, 0));

        if let Some(base_version) = request.base_version {
            if base_version > 0 || file_version > 0 {
                let conflicting: Vec<ConflictingOp> = sqlx::query_as(
                    "SELECT seq, op_encrypted, client_id FROM operations \
                     WHERE room_id = ?1 AND file_path_hash = ?2 AND seq > ?3 AND client_id != ?4 \
                     ORDER BY seq",
                )
                .bind(room_id)
                .bind(&request.file_path_hash)
                .bind(snapshot_seq)
                .bind(&request.client_id)
                .fetch_all(&mut *tx)
                .await?;

                if !conflicting.is_empty() && base_version < file_version {
                    tx.rollback().await.map_err(DatabaseError::from)?;
                    return Err(OpError::Conflict {
                        current_version: file_version,
                        base_version,
                        conflicting_ops: conflicting,
                    });
                }
            }
        }

        sqlx::query(
            "INSERT INTO operations \
             (room_id, file_path_hash, seq, op_encrypted, client_id, base_version, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(room_id)
        .bind(&request.file_path_hash)
        .bind(seq)
        .bind(&request.op_encrypted)
        .bind(&request.client_id)
        .bind(request.base_version.unwrap_or(0))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        // The edited file moves with the room counter, so delta readers
        // polling `since` pick it up.
        if file_version > 0 {
            sqlx::query(
                "UPDATE files SET version = ?1, updated_at = ?2 \
                 WHERE room_id = ?3 AND path_hash = ?4",
            )
            .bind(room_version)
            .bind(Utc::now())
            .bind(room_id)
            .bind(&request.file_path_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(SubmitOpResponse {
            seq,
            current_version: room_version,
        })
    }

    /// Fetch up to a page of operations with `seq > since`, ascending,
    /// optionally restricted to one file.
    pub async fn fetch(
        &self,
        room_id: &str,
        since: i64,
        file_path_hash: Option<&str>,
    ) -> Result<OpsPage, OpError> {
        let ops: Vec<OperationRecord> = match file_path_hash {
            Some(hash) => {
                sqlx::query_as(
                    "SELECT seq, file_path_hash, op_encrypted, client_id, base_version \
                     FROM operations WHERE room_id = ?1 AND seq > ?2 AND file_path_hash = ?3 \
                     ORDER BY seq LIMIT ?4",
                )
                .bind(room_id)
                .bind(since)
                .bind(hash)
                .bind(self.page_size)
                .fetch_all(self.pool.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT seq, file_path_hash, op_encrypted, client_id, base_version \
                     FROM operations WHERE room_id = ?1 AND seq > ?2 \
                     ORDER BY seq LIMIT ?3",
                )
                .bind(room_id)
                .bind(since)
                .bind(self.page_size)
                .fetch_all(self.pool.pool())
                .await?
            }
        };

        let op_seq: i64 = sqlx::query_scalar("SELECT op_seq FROM rooms WHERE id = ?1")
            .bind(room_id)
            .fetch_optional(self.pool.pool())
            .await?
            .unwrap_or(0);

        let has_more = ops.len() as i64 == self.page_size;
        Ok(OpsPage {
            ops,
            op_seq,
            has_more,
        })
    }

    /// Replace the file body with a client-materialized compaction covering
    /// everything up to `through_seq`, then prune the covered ops. The
    /// server trusts the client to have materialized correctly. Returns
    /// `None` when the file is unknown in the room.
    pub async fn snapshot(
        &self,
        room_id: &str,
        path_hash: &str,
        content_encrypted: &str,
        through_seq: i64,
    ) -> Result<Option<SnapshotResponse>, OpError> {
        if through_seq < 0 {
            return Err(OpError::Validation("through_seq must be non-negative".into()));
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;

        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE files SET content_encrypted = ?1, snapshot_seq = ?2, \
                    version = ?3, updated_at = ?4 \
             WHERE room_id = ?5 AND path_hash = ?6 RETURNING version",
        )
        .bind(content_encrypted)
        .bind(through_seq)
        .bind(room_version)
        .bind(Utc::now())
        .bind(room_id)
        .bind(path_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(version) = version else {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(None);
        };

        sqlx::query(
            "DELETE FROM operations WHERE room_id = ?1 AND file_path_hash = ?2 AND seq <= ?3",
        )
        .bind(room_id)
        .bind(path_hash)
        .bind(through_seq)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(Some(SnapshotResponse {
            version,
            snapshot_seq: through_seq,
            room_version,
        }))
    }
}
