//! # Delta State Reads
//!
//! The polling endpoint of the sync protocol. A client that last saw room
//! version `N` asks for everything that changed since: files whose per-file
//! version is newer, the path hashes deleted since, and every changeset
//! still awaiting review. Applied to exhaustion (paging until `has_more` is
//! false, then dropping the deleted hashes), the response reconciles the
//! client to the current server state.

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};

use crate::changesets::{self, ChangesetView};
use crate::database::{ConnectionPool, Result};
use crate::files::FileRecord;

/// Query parameters of a delta read.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StateQuery {
    /// Room version the caller already holds
    #[serde(default)]
    pub since: i64,
    /// Page size (capped at the configured maximum)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Page offset
    #[serde(default)]
    pub offset: i64,
}

/// Response of a delta read.
#[derive(Debug, Clone, Serialize)]
pub struct RoomStateResponse {
    /// Current room version
    pub version: i64,
    /// Current operation sequence
    pub op_seq: i64,
    /// Files with per-file version newer than `since`
    pub files: Vec<FileRecord>,
    /// Path hashes deleted after `since`; omitted when `since` is zero,
    /// because a caller with no prior state has nothing to reconcile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_path_hashes: Option<Vec<String>>,
    /// True iff another page of files may exist
    pub has_more: bool,
    /// Changesets awaiting review, with their child changes
    pub changesets: Vec<ChangesetView>,
}

/// Reader assembling delta state responses.
#[derive(Clone)]
pub struct StateReader {
    pool: ConnectionPool,
    max_page_size: i64,
}

impl StateReader {
    /// Create a new state reader
    pub fn new(pool: ConnectionPool, max_page_size: i64) -> Self {
        Self {
            pool,
            max_page_size,
        }
    }

    /// Fetch the room state delta since `query.since`. All reads happen in
    /// one transaction so the counters, file page, tombstones and changesets
    /// describe a single point in time.
    pub async fn fetch(&self, room_id: &str, query: StateQuery) -> Result<RoomStateResponse> {
        let limit = query
            .limit
            .unwrap_or(self.max_page_size)
            .clamp(1, self.max_page_size);
        let offset = query.offset.max(0);
        let since = query.since.max(0);

        let mut tx = self.pool.begin().await?;

        let (version, op_seq): (i64, i64) =
            sqlx::query_as("SELECT version, op_seq FROM rooms WHERE id = ?1")
                .bind(room_id)
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or((0, 0));

        let files: Vec<FileRecord> = sqlx::query_as(
            "SELECT id, path_hash, path_encrypted, content_encrypted, is_syncable, \
                    size_bytes, version, snapshot_seq, updated_at \
             FROM files WHERE room_id = ?1 AND version > ?2 \
             ORDER BY path_encrypted LIMIT ?3 OFFSET ?4",
        )
        .bind(room_id)
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await?;

        let deleted_path_hashes = if since > 0 {
            Some(deleted_since(&mut tx, room_id, since).await?)
        } else {
            None
        };

        let changesets = changesets::list_open_in_tx(&mut tx, room_id).await?;

        tx.commit().await?;

        let has_more = files.len() as i64 == limit;
        Ok(RoomStateResponse {
            version,
            op_seq,
            files,
            deleted_path_hashes,
            has_more,
            changesets,
        })
    }
}

/// Path hashes removed after `since`. A hash that has since been re-created
/// is excluded: the file row already carries the newer state, and reporting
/// the stale tombstone would make the client drop it again.
async fn deleted_since(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
    since: i64,
) -> Result<Vec<String>> {
    let hashes = sqlx::query_scalar(
        "SELECT DISTINCT path_hash FROM deleted_files \
         WHERE room_id = ?1 AND deleted_at_version > ?2 \
           AND path_hash NOT IN (SELECT path_hash FROM files WHERE room_id = ?1) \
         ORDER BY path_hash",
    )
    .bind(room_id)
    .bind(since)
    .fetch_all(&mut **tx)
    .await?;
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use crate::files::{FileStore, UpsertFileRequest};

    async fn fixture() -> (ConnectionPool, FileStore, StateReader) {
        let pool = ConnectionPool::in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        (
            pool.clone(),
            FileStore::new(pool.clone()),
            StateReader::new(pool, 1000),
        )
    }

    fn upsert(path_hash: &str) -> UpsertFileRequest {
        UpsertFileRequest {
            path_hash: path_hash.to_string(),
            path_encrypted: format!("enc:{path_hash}"),
            content_encrypted: Some(format!("C:{path_hash}")),
            is_syncable: true,
            size_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_empty_room_state() {
        let (_, _, reader) = fixture().await;
        let state = reader
            .fetch(
                "RM000001",
                StateQuery {
                    since: 0,
                    limit: None,
                    offset: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(state.version, 0);
        assert_eq!(state.op_seq, 0);
        assert!(state.files.is_empty());
        assert!(state.deleted_path_hashes.is_none());
        assert!(!state.has_more);
    }

    #[tokio::test]
    async fn test_since_filters_unchanged_files() {
        let (_, files, reader) = fixture().await;
        files.upsert("RM000001", &upsert("aa")).await.unwrap();
        files.upsert("RM000001", &upsert("bb")).await.unwrap();
        // Second write lifts bb's file version to 2.
        files.upsert("RM000001", &upsert("bb")).await.unwrap();

        let state = reader
            .fetch(
                "RM000001",
                StateQuery {
                    since: 1,
                    limit: None,
                    offset: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files[0].path_hash, "bb");
        assert_eq!(state.deleted_path_hashes.as_deref(), Some(&[] as &[String]));
    }

    #[tokio::test]
    async fn test_recreated_file_suppresses_tombstone() {
        let (_, files, reader) = fixture().await;
        let (record, _) = files.upsert("RM000001", &upsert("aa")).await.unwrap();
        files.delete("RM000001", &record.id).await.unwrap();
        files.upsert("RM000001", &upsert("aa")).await.unwrap();

        let state = reader
            .fetch(
                "RM000001",
                StateQuery {
                    since: 1,
                    limit: None,
                    offset: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(state.files.len(), 1);
        assert_eq!(state.deleted_path_hashes.as_deref(), Some(&[] as &[String]));
    }

    #[tokio::test]
    async fn test_pagination_reports_has_more() {
        let (_, files, reader) = fixture().await;
        for hash in ["aa", "bb", "cc"] {
            files.upsert("RM000001", &upsert(hash)).await.unwrap();
        }

        let first = reader
            .fetch(
                "RM000001",
                StateQuery {
                    since: 0,
                    limit: Some(2),
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.files.len(), 2);
        assert!(first.has_more);

        let second = reader
            .fetch(
                "RM000001",
                StateQuery {
                    since: 0,
                    limit: Some(2),
                    offset: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.files.len(), 1);
        assert!(!second.has_more);
    }
}
