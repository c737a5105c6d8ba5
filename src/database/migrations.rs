//! # Schema Migrations
//!
//! Embedded, forward-only migrations applied at startup. Applied versions
//! are tracked in a `_migrations` table; each migration runs inside its own
//! transaction.

use chrono::Utc;

use crate::database::{ConnectionPool, DatabaseError, Result};

/// A single schema migration.
struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    statements: &[
        r#"
        CREATE TABLE rooms (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL DEFAULT 0,
            op_seq INTEGER NOT NULL DEFAULT 0,
            password_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE files (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            path_hash TEXT NOT NULL,
            path_encrypted TEXT NOT NULL,
            content_encrypted TEXT,
            is_syncable INTEGER NOT NULL DEFAULT 1,
            size_bytes INTEGER,
            version INTEGER NOT NULL DEFAULT 1,
            snapshot_seq INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(room_id, path_hash),
            CHECK (content_encrypted IS NOT NULL OR is_syncable = 0)
        )
        "#,
        "CREATE INDEX idx_files_room_version ON files(room_id, version)",
        r#"
        CREATE TABLE operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            file_path_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            op_encrypted TEXT NOT NULL,
            client_id TEXT NOT NULL,
            base_version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(room_id, seq)
        )
        "#,
        "CREATE INDEX idx_operations_room_file ON operations(room_id, file_path_hash, seq)",
        r#"
        CREATE TABLE deleted_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            path_hash TEXT NOT NULL,
            deleted_at_version INTEGER NOT NULL,
            deleted_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX idx_deleted_files_room ON deleted_files(room_id, deleted_at_version)",
        r#"
        CREATE TABLE changesets (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            author_encrypted TEXT,
            message_encrypted TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            resolved_at TEXT
        )
        "#,
        "CREATE INDEX idx_changesets_room_status ON changesets(room_id, status)",
        r#"
        CREATE TABLE changes (
            id TEXT PRIMARY KEY,
            changeset_id TEXT NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
            room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            file_path_hash TEXT NOT NULL,
            file_path_encrypted TEXT NOT NULL,
            old_content_encrypted TEXT,
            new_content_encrypted TEXT NOT NULL,
            diff_encrypted TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX idx_changes_changeset ON changes(changeset_id)",
    ],
}];

/// Apply all pending migrations.
pub async fn run_migrations(pool: &ConnectionPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool.pool())
    .await
    .map_err(|e| DatabaseError::Migration(format!("failed to create migrations table: {e}")))?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool.pool())
        .await
        .map_err(|e| DatabaseError::Migration(format!("failed to load migration history: {e}")))?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
        }
        sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        tx.commit().await?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_apply() {
        let pool = ConnectionPool::in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'rooms'",
        )
        .fetch_one(pool.pool())
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = ConnectionPool::in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(pool.pool())
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
