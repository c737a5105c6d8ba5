//! # File Store
//!
//! Single-file upsert and delete on the encrypted file rows of a room.
//! Files are keyed externally by `(room_id, path_hash)`; the path hash is
//! computed client-side over the plaintext path, which the server never
//! sees. Removals always leave a tombstone stamped with the room version at
//! the moment of deletion so delta-sync clients can learn about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::database::{ConnectionPool, DatabaseError};
use crate::rooms;

/// File store error types
#[derive(Debug, Error)]
pub enum FileError {
    /// Caller-correctable request problem
    #[error("{0}")]
    Validation(String),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for FileError {
    fn from(e: sqlx::Error) -> Self {
        FileError::Database(DatabaseError::Sqlx(e))
    }
}

/// A stored (encrypted) file row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FileRecord {
    /// Server-assigned opaque identifier
    pub id: String,
    /// Client-computed SHA-256 of the plaintext path
    pub path_hash: String,
    /// Ciphertext of the path
    pub path_encrypted: String,
    /// Ciphertext of the body; absent for non-syncable files
    pub content_encrypted: Option<String>,
    /// Whether the file participates in delta sync
    pub is_syncable: bool,
    /// Display size for non-syncable files
    pub size_bytes: Option<i64>,
    /// Room version stamped at this file's last write; strictly increasing
    /// per file, and the value `since`-based delta reads filter on
    pub version: i64,
    /// Operation sequence at which the body was last materialized
    pub snapshot_seq: i64,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

/// Upsert request body.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertFileRequest {
    /// Client-computed SHA-256 of the plaintext path
    pub path_hash: String,
    /// Ciphertext of the path
    pub path_encrypted: String,
    /// Ciphertext of the body; may be null for non-syncable files
    #[serde(default)]
    pub content_encrypted: Option<String>,
    /// Whether the file participates in delta sync (default true)
    #[serde(default = "default_syncable")]
    pub is_syncable: bool,
    /// Display size for non-syncable files
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

fn default_syncable() -> bool {
    true
}

impl UpsertFileRequest {
    fn validate(&self) -> Result<(), FileError> {
        if self.path_hash.is_empty() {
            return Err(FileError::Validation("path_hash is required".into()));
        }
        if self.path_encrypted.is_empty() {
            return Err(FileError::Validation("path_encrypted is required".into()));
        }
        if self.is_syncable && self.content_encrypted.is_none() {
            return Err(FileError::Validation(
                "content_encrypted is required for syncable files".into(),
            ));
        }
        Ok(())
    }
}

/// Store for encrypted file rows.
#[derive(Clone)]
pub struct FileStore {
    pool: ConnectionPool,
}

impl FileStore {
    /// Create a new file store
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Insert or update a file by `(room_id, path_hash)`, advancing the room
    /// version and stamping it on the row. Returns the stored row and the
    /// new room version. Never writes a tombstone.
    pub async fn upsert(
        &self,
        room_id: &str,
        request: &UpsertFileRequest,
    ) -> Result<(FileRecord, i64), FileError> {
        request.validate()?;

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;
        let record = upsert_in_tx(&mut tx, room_id, request, room_version).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok((record, room_version))
    }

    /// Delete a file by its server-assigned ID, advancing the room version
    /// and writing a tombstone at the new version. Returns the new room
    /// version, or `None` when the file is unknown in that room.
    pub async fn delete(&self, room_id: &str, file_id: &str) -> Result<Option<i64>, FileError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;

        let path_hash: Option<String> = sqlx::query_scalar(
            "DELETE FROM files WHERE room_id = ?1 AND id = ?2 RETURNING path_hash",
        )
        .bind(room_id)
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(path_hash) = path_hash else {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(None);
        };

        write_tombstone(&mut tx, room_id, &path_hash, room_version).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(Some(room_version))
    }
}

/// Upsert one file row inside an open transaction without touching the room
/// counter; callers own the version-bump discipline and pass the bumped
/// value in. File rows are stamped with the room version of their last
/// write, which keeps the per-file version strictly increasing and makes
/// `version > since` delta filtering sound across a whole room.
pub(crate) async fn upsert_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
    request: &UpsertFileRequest,
    room_version: i64,
) -> Result<FileRecord, FileError> {
    request.validate()?;

    // Non-syncable files never store a body, whatever the payload says.
    let content = if request.is_syncable {
        request.content_encrypted.clone()
    } else {
        None
    };

    let record = sqlx::query_as::<_, FileRecord>(
        r#"
        INSERT INTO files
            (id, room_id, path_hash, path_encrypted, content_encrypted,
             is_syncable, size_bytes, version, snapshot_seq, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)
        ON CONFLICT(room_id, path_hash) DO UPDATE SET
            path_encrypted = excluded.path_encrypted,
            content_encrypted = excluded.content_encrypted,
            is_syncable = excluded.is_syncable,
            size_bytes = excluded.size_bytes,
            version = excluded.version,
            updated_at = excluded.updated_at
        RETURNING id, path_hash, path_encrypted, content_encrypted,
                  is_syncable, size_bytes, version, snapshot_seq, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(room_id)
    .bind(&request.path_hash)
    .bind(&request.path_encrypted)
    .bind(content)
    .bind(request.is_syncable)
    .bind(request.size_bytes)
    .bind(room_version)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;

    Ok(record)
}

/// Record that `path_hash` was removed at room version `deleted_at_version`.
pub(crate) async fn write_tombstone(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
    path_hash: &str,
    deleted_at_version: i64,
) -> Result<(), FileError> {
    sqlx::query(
        "INSERT INTO deleted_files (room_id, path_hash, deleted_at_version, deleted_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(room_id)
    .bind(path_hash)
    .bind(deleted_at_version)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
