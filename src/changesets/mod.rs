//! # Changeset Workflow
//!
//! A changeset is a named set of proposed file replacements (for AI or
//! collaborator review), opaque to the server. Each child change can be
//! accepted or rejected individually; acceptance upserts the target file
//! through the same version-bump discipline as the file store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::database::{ConnectionPool, DatabaseError};
use crate::files::{self, UpsertFileRequest};
use crate::rooms;

/// Changeset workflow error types
#[derive(Debug, Error)]
pub enum ChangesetError {
    /// Caller-correctable request problem
    #[error("{0}")]
    Validation(String),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for ChangesetError {
    fn from(e: sqlx::Error) -> Self {
        ChangesetError::Database(DatabaseError::Sqlx(e))
    }
}

/// Review status of a whole changeset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChangesetStatus {
    /// No child has been resolved yet
    Pending,
    /// Applied as a whole, or every child individually accepted
    Accepted,
    /// Rejected as a whole, or every child individually rejected
    Rejected,
    /// Some children resolved, with a mix of outcomes or children pending
    Partial,
}

/// Review status of a single proposed change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Awaiting review
    Pending,
    /// Applied to the target file
    Accepted,
    /// Declined; target file untouched
    Rejected,
}

/// One proposed file replacement inside a changeset.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChangeView {
    /// Change identifier
    pub id: String,
    /// Parent changeset identifier
    pub changeset_id: String,
    /// Upsert key of the target file
    pub file_path_hash: String,
    /// Ciphertext of the target path
    pub file_path_encrypted: String,
    /// Ciphertext of the body being replaced
    pub old_content_encrypted: Option<String>,
    /// Ciphertext of the proposed body
    pub new_content_encrypted: String,
    /// Ciphertext of the rendered diff
    pub diff_encrypted: Option<String>,
    /// Review status
    pub status: ChangeStatus,
}

/// A changeset with its child changes.
#[derive(Debug, Clone, Serialize)]
pub struct ChangesetView {
    /// Changeset identifier
    pub id: String,
    /// Ciphertext of the author name
    pub author_encrypted: Option<String>,
    /// Ciphertext of the review message
    pub message_encrypted: Option<String>,
    /// Derived review status
    pub status: ChangesetStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set when the status first leaves `pending`
    pub resolved_at: Option<DateTime<Utc>>,
    /// Child changes
    pub changes: Vec<ChangeView>,
}

/// One proposed change in a create request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChange {
    /// Upsert key of the target file
    pub file_path_hash: String,
    /// Ciphertext of the target path
    pub file_path_encrypted: String,
    /// Ciphertext of the body being replaced
    #[serde(default)]
    pub old_content_encrypted: Option<String>,
    /// Ciphertext of the proposed body
    pub new_content_encrypted: String,
    /// Ciphertext of the rendered diff
    #[serde(default)]
    pub diff_encrypted: Option<String>,
}

/// Create request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChangesetRequest {
    /// Ciphertext of the author name
    #[serde(default)]
    pub author_encrypted: Option<String>,
    /// Ciphertext of the review message
    #[serde(default)]
    pub message_encrypted: Option<String>,
    /// Proposed changes, one per file
    pub changes: Vec<NewChange>,
}

/// Outcome of resolving a whole changeset or a single change.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    /// Status of the parent changeset after the resolution
    pub changeset_status: ChangesetStatus,
    /// Room version after the resolution
    pub room_version: i64,
}

#[derive(sqlx::FromRow)]
struct ChangesetRow {
    id: String,
    author_encrypted: Option<String>,
    message_encrypted: Option<String>,
    status: ChangesetStatus,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

/// Store for changesets and their child changes.
#[derive(Clone)]
pub struct ChangesetStore {
    pool: ConnectionPool,
}

impl ChangesetStore {
    /// Create a new changeset store
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Create a changeset with one `pending` child per proposed change.
    pub async fn create(
        &self,
        room_id: &str,
        request: &CreateChangesetRequest,
    ) -> Result<ChangesetView, ChangesetError> {
        if request.changes.is_empty() {
            return Err(ChangesetError::Validation(
                "a changeset needs at least one change".into(),
            ));
        }
        for change in &request.changes {
            if change.file_path_hash.is_empty() || change.file_path_encrypted.is_empty() {
                return Err(ChangesetError::Validation(
                    "every change needs file_path_hash and file_path_encrypted".into(),
                ));
            }
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        rooms::bump_version(&mut tx, room_id).await?;

        let changeset_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO changesets (id, room_id, author_encrypted, message_encrypted, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&changeset_id)
        .bind(room_id)
        .bind(&request.author_encrypted)
        .bind(&request.message_encrypted)
        .bind(ChangesetStatus::Pending)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let mut changes = Vec::with_capacity(request.changes.len());
        for change in &request.changes {
            let change_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO changes \
                 (id, changeset_id, room_id, file_path_hash, file_path_encrypted, \
                  old_content_encrypted, new_content_encrypted, diff_encrypted, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(&change_id)
            .bind(&changeset_id)
            .bind(room_id)
            .bind(&change.file_path_hash)
            .bind(&change.file_path_encrypted)
            .bind(&change.old_content_encrypted)
            .bind(&change.new_content_encrypted)
            .bind(&change.diff_encrypted)
            .bind(ChangeStatus::Pending)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            changes.push(ChangeView {
                id: change_id,
                changeset_id: changeset_id.clone(),
                file_path_hash: change.file_path_hash.clone(),
                file_path_encrypted: change.file_path_encrypted.clone(),
                old_content_encrypted: change.old_content_encrypted.clone(),
                new_content_encrypted: change.new_content_encrypted.clone(),
                diff_encrypted: change.diff_encrypted.clone(),
                status: ChangeStatus::Pending,
            });
        }

        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(ChangesetView {
            id: changeset_id,
            author_encrypted: request.author_encrypted.clone(),
            message_encrypted: request.message_encrypted.clone(),
            status: ChangesetStatus::Pending,
            created_at,
            resolved_at: None,
            changes,
        })
    }

    /// Accept a whole changeset: upsert every still-pending child into its
    /// target file, mark those children accepted, and mark the changeset
    /// accepted. Returns `None` when the changeset is unknown in the room.
    pub async fn accept_all(
        &self,
        room_id: &str,
        changeset_id: &str,
    ) -> Result<Option<ResolveOutcome>, ChangesetError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let mut room_version = rooms::bump_version(&mut tx, room_id).await?;

        if !changeset_exists(&mut tx, room_id, changeset_id).await? {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(None);
        }

        let pending: Vec<ChangeView> = sqlx::query_as(
            "SELECT id, changeset_id, file_path_hash, file_path_encrypted, \
                    old_content_encrypted, new_content_encrypted, diff_encrypted, status \
             FROM changes WHERE changeset_id = ?1 AND status = ?2",
        )
        .bind(changeset_id)
        .bind(ChangeStatus::Pending)
        .fetch_all(&mut *tx)
        .await?;

        for change in &pending {
            // Each applied change is a file write of its own and follows the
            // per-upsert version-bump discipline.
            room_version = rooms::bump_version(&mut tx, room_id).await?;
            let upsert = upsert_for_change(change);
            files::upsert_in_tx(&mut tx, room_id, &upsert, room_version)
                .await
                .map_err(|e| ChangesetError::Validation(e.to_string()))?;
        }

        sqlx::query("UPDATE changes SET status = ?1 WHERE changeset_id = ?2 AND status = ?3")
            .bind(ChangeStatus::Accepted)
            .bind(changeset_id)
            .bind(ChangeStatus::Pending)
            .execute(&mut *tx)
            .await?;
        resolve_parent(&mut tx, changeset_id, ChangesetStatus::Accepted).await?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(Some(ResolveOutcome {
            changeset_status: ChangesetStatus::Accepted,
            room_version,
        }))
    }

    /// Reject a whole changeset: mark every child rejected and the changeset
    /// rejected. No file is touched.
    pub async fn reject_all(
        &self,
        room_id: &str,
        changeset_id: &str,
    ) -> Result<Option<ResolveOutcome>, ChangesetError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let room_version = rooms::bump_version(&mut tx, room_id).await?;

        if !changeset_exists(&mut tx, room_id, changeset_id).await? {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(None);
        }

        sqlx::query("UPDATE changes SET status = ?1 WHERE changeset_id = ?2")
            .bind(ChangeStatus::Rejected)
            .bind(changeset_id)
            .execute(&mut *tx)
            .await?;
        resolve_parent(&mut tx, changeset_id, ChangesetStatus::Rejected).await?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(Some(ResolveOutcome {
            changeset_status: ChangesetStatus::Rejected,
            room_version,
        }))
    }

    /// Accept or reject a single change. Acceptance upserts the target file.
    /// The parent status is recomputed from the children afterwards; its
    /// `resolved_at` is set the first time it leaves `pending`. Returns
    /// `None` when the change is unknown in the room.
    pub async fn resolve_change(
        &self,
        room_id: &str,
        change_id: &str,
        accept: bool,
    ) -> Result<Option<ResolveOutcome>, ChangesetError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        rooms::ensure_in_tx(&mut tx, room_id).await?;
        let mut room_version = rooms::bump_version(&mut tx, room_id).await?;

        let change: Option<ChangeView> = sqlx::query_as(
            "SELECT id, changeset_id, file_path_hash, file_path_encrypted, \
                    old_content_encrypted, new_content_encrypted, diff_encrypted, status \
             FROM changes WHERE room_id = ?1 AND id = ?2",
        )
        .bind(room_id)
        .bind(change_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(change) = change else {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Ok(None);
        };
        if change.status != ChangeStatus::Pending {
            tx.rollback().await.map_err(DatabaseError::from)?;
            return Err(ChangesetError::Validation("change already resolved".into()));
        }

        let new_status = if accept {
            room_version = rooms::bump_version(&mut tx, room_id).await?;
            let upsert = upsert_for_change(&change);
            files::upsert_in_tx(&mut tx, room_id, &upsert, room_version)
                .await
                .map_err(|e| ChangesetError::Validation(e.to_string()))?;
            ChangeStatus::Accepted
        } else {
            ChangeStatus::Rejected
        };

        sqlx::query("UPDATE changes SET status = ?1 WHERE id = ?2")
            .bind(new_status)
            .bind(change_id)
            .execute(&mut *tx)
            .await?;

        let siblings: Vec<ChangeStatus> =
            sqlx::query_scalar("SELECT status FROM changes WHERE changeset_id = ?1")
                .bind(&change.changeset_id)
                .fetch_all(&mut *tx)
                .await?;
        let parent_status = derive_parent_status(&siblings);
        resolve_parent(&mut tx, &change.changeset_id, parent_status).await?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(Some(ResolveOutcome {
            changeset_status: parent_status,
            room_version,
        }))
    }
}

/// Parent status implied by a set of child statuses.
fn derive_parent_status(children: &[ChangeStatus]) -> ChangesetStatus {
    if children.iter().all(|s| *s == ChangeStatus::Pending) {
        ChangesetStatus::Pending
    } else if children.iter().all(|s| *s == ChangeStatus::Accepted) {
        ChangesetStatus::Accepted
    } else if children.iter().all(|s| *s == ChangeStatus::Rejected) {
        ChangesetStatus::Rejected
    } else {
        ChangesetStatus::Partial
    }
}

fn upsert_for_change(change: &ChangeView) -> UpsertFileRequest {
    UpsertFileRequest {
        path_hash: change.file_path_hash.clone(),
        path_encrypted: change.file_path_encrypted.clone(),
        content_encrypted: Some(change.new_content_encrypted.clone()),
        is_syncable: true,
        size_bytes: None,
    }
}

async fn changeset_exists(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
    changeset_id: &str,
) -> Result<bool, ChangesetError> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT id FROM changesets WHERE room_id = ?1 AND id = ?2")
            .bind(room_id)
            .bind(changeset_id)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(found.is_some())
}

/// Write the parent status, stamping `resolved_at` the first time the status
/// leaves `pending`.
async fn resolve_parent(
    tx: &mut Transaction<'_, Sqlite>,
    changeset_id: &str,
    status: ChangesetStatus,
) -> Result<(), ChangesetError> {
    if status == ChangesetStatus::Pending {
        return Ok(());
    }
    sqlx::query(
        "UPDATE changesets SET status = ?1, resolved_at = COALESCE(resolved_at, ?2) WHERE id = ?3",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(changeset_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Fetch every changeset still awaiting review in a room (status `pending`
/// or `partial`), each with all of its child changes.
pub(crate) async fn list_open_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    room_id: &str,
) -> crate::database::Result<Vec<ChangesetView>> {
    let parents: Vec<ChangesetRow> = sqlx::query_as(
        "SELECT id, author_encrypted, message_encrypted, status, created_at, resolved_at \
         FROM changesets WHERE room_id = ?1 AND status IN (?2, ?3) ORDER BY created_at, id",
    )
    .bind(room_id)
    .bind(ChangesetStatus::Pending)
    .bind(ChangesetStatus::Partial)
    .fetch_all(&mut **tx)
    .await?;

    let mut views = Vec::with_capacity(parents.len());
    for parent in parents {
        let changes: Vec<ChangeView> = sqlx::query_as(
            "SELECT id, changeset_id, file_path_hash, file_path_encrypted, \
                    old_content_encrypted, new_content_encrypted, diff_encrypted, status \
             FROM changes WHERE changeset_id = ?1 ORDER BY created_at, id",
        )
        .bind(&parent.id)
        .fetch_all(&mut **tx)
        .await?;

        views.push(ChangesetView {
            id: parent.id,
            author_encrypted: parent.author_encrypted,
            message_encrypted: parent.message_encrypted,
            status: parent.status,
            created_at: parent.created_at,
            resolved_at: parent.resolved_at,
            changes,
        });
    }
    Ok(views)
}
