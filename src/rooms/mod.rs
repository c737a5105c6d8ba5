//! # Room Registry
//!
//! Rooms are created lazily on first reference and carry the two monotonic
//! counters everything else hangs off: `version` (bumped by every durable
//! mutation, the basis for delta-sync polling) and `op_seq` (stamped on each
//! operation-log entry).
//!
//! The version-bump helpers here are the first statement of every mutating
//! transaction. On SQLite that `UPDATE` acquires the database write lock, so
//! two concurrent mutations on the same room are totally ordered and no two
//! successful mutations observe the same version value.

pub mod retention;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

use crate::database::{ConnectionPool, Result};

/// Length of a room identifier.
pub const ROOM_ID_LEN: usize = 8;

/// Room counters returned to delta-sync clients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoomCounters {
    /// Monotonic room version
    pub version: i64,
    /// Monotonic operation sequence
    pub op_seq: i64,
}

/// Public room metadata (safe to expose without a password).
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    /// Room identifier
    pub id: String,
    /// Whether the room is password protected
    pub has_password: bool,
}

/// Returns true iff `id` is an 8-character case-sensitive alphanumeric
/// room identifier.
pub fn is_valid_room_id(id: &str) -> bool {
    id.len() == ROOM_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Generate a fresh random room identifier.
pub fn generate_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(char::from)
        .collect()
}

/// Store for room rows.
#[derive(Clone)]
pub struct RoomStore {
    pool: ConnectionPool,
}

impl RoomStore {
    /// Create a new room store
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Idempotently create the room if it does not exist yet.
    pub async fn ensure(&self, room_id: &str) -> Result<()> {
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO rooms (id, version, op_seq, created_at, updated_at) \
             VALUES (?1, 0, 0, ?2, ?2) ON CONFLICT(id) DO NOTHING",
        )
        .bind(room_id)
        .bind(now)
        .execute(self.pool.pool())
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(room = room_id, "room created");
        }
        Ok(())
    }

    /// Public metadata for a room. Does not create the room.
    pub async fn info(&self, room_id: &str) -> Result<RoomInfo> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM rooms WHERE id = ?1")
                .bind(room_id)
                .fetch_optional(self.pool.pool())
                .await?;

        Ok(RoomInfo {
            id: room_id.to_string(),
            has_password: matches!(hash, Some(Some(_))),
        })
    }

    /// Current room version, if the room exists.
    pub async fn version(&self, room_id: &str) -> Result<Option<i64>> {
        let version = sqlx::query_scalar("SELECT version FROM rooms WHERE id = ?1")
            .bind(room_id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(version)
    }

    /// Both room counters, if the room exists.
    pub async fn counters(&self, room_id: &str) -> Result<Option<RoomCounters>> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT version, op_seq FROM rooms WHERE id = ?1")
                .bind(room_id)
                .fetch_optional(self.pool.pool())
                .await?;
        Ok(row.map(|(version, op_seq)| RoomCounters { version, op_seq }))
    }

    /// Stored password hash. `Ok(None)` means the room has no password or
    /// does not exist.
    pub async fn password_hash(&self, room_id: &str) -> Result<Option<String>> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM rooms WHERE id = ?1")
                .bind(room_id)
                .fetch_optional(self.pool.pool())
                .await?;
        Ok(hash.flatten())
    }

    /// Replace (or clear) the room's password hash. Bumps the room version.
    pub async fn set_password_hash(&self, room_id: &str, hash: Option<String>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        ensure_in_tx(&mut tx, room_id).await?;
        let version = bump_version(&mut tx, room_id).await?;
        sqlx::query("UPDATE rooms SET password_hash = ?1 WHERE id = ?2")
            .bind(hash)
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(version)
    }

    /// Kill switch: remove the room and, via cascade, everything in it.
    /// Returns false when the room does not exist.
    pub async fn delete(&self, room_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = ?1")
            .bind(room_id)
            .execute(self.pool.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(room = room_id, "room deleted");
        }
        Ok(deleted)
    }
}

/// Idempotent room insert inside an open transaction. Runs a write statement
/// even when the room exists, so the transaction holds the write lock from
/// its first statement.
pub(crate) async fn ensure_in_tx(tx: &mut Transaction<'_, Sqlite>, room_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO rooms (id, version, op_seq, created_at, updated_at) \
         VALUES (?1, 0, 0, ?2, ?2) ON CONFLICT(id) DO NOTHING",
    )
    .bind(room_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Advance the room version by one and touch `updated_at`, returning the new
/// version. Must be the first write of the enclosing mutation.
pub(crate) async fn bump_version(tx: &mut Transaction<'_, Sqlite>, room_id: &str) -> Result<i64> {
    let version: i64 = sqlx::query_scalar(
        "UPDATE rooms SET version = version + 1, updated_at = ?1 WHERE id = ?2 RETURNING version",
    )
    .bind(Utc::now())
    .bind(room_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(version)
}

/// Advance both counters in one statement, returning `(version, op_seq)`.
/// Used by operation submission, which stamps the new `op_seq` on the op.
pub(crate) async fn bump_version_and_op_seq(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "UPDATE rooms SET version = version + 1, op_seq = op_seq + 1, updated_at = ?1 \
         WHERE id = ?2 RETURNING version, op_seq",
    )
    .bind(Utc::now())
    .bind(room_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}
