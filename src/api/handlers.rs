//! # Request Handlers
//!
//! Thin JSON adapters over the domain stores. Every multi-statement write
//! lives inside the stores, each wrapped in a single transaction; handlers
//! validate, delegate, and shape responses.

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::responses::ApiError;
use crate::api::AppState;
use crate::auth;
use crate::changesets::{ChangesetStatus, CreateChangesetRequest};
use crate::files::{FileRecord, UpsertFileRequest};
use crate::ops::SubmitOpRequest;
use crate::rooms;
use crate::state::StateQuery;

/// Built-in placeholder served when no client asset is configured.
const EMBEDDED_CLIENT: &str = include_str!("../../assets/index.html");

// ---------------------------------------------------------------------------
// Room pages and metadata
// ---------------------------------------------------------------------------

/// `GET /` - redirect to a fresh room.
pub async fn root_redirect() -> impl IntoResponse {
    let location = format!("/room/{}", rooms::generate_room_id());
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

/// `GET /room/:id` - serve the single-file client asset.
pub async fn serve_client(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> axum::response::Response {
    if !rooms::is_valid_room_id(&room_id) {
        return root_redirect().await.into_response();
    }

    if let Some(path) = &state.config.asset_path {
        match tokio::fs::read_to_string(path).await {
            Ok(asset) => return Html(asset).into_response(),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "client asset unreadable");
            }
        }
    }
    Html(EMBEDDED_CLIENT.to_string()).into_response()
}

/// `GET /api/room/:id/info` - public presence probe. Never creates the room.
pub async fn room_info(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !rooms::is_valid_room_id(&room_id) {
        return Err(ApiError::Validation("malformed room id".into()));
    }
    let info = state.rooms.info(&room_id).await?;
    Ok(Json(info))
}

/// `GET /api/room/:id/version`
pub async fn room_version(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.rooms.ensure(&room_id).await?;
    let version = state.rooms.version(&room_id).await?.unwrap_or(0);
    Ok(Json(json!({ "version": version })))
}

/// `DELETE /api/room/:id` - kill switch; cascades to every dependent row.
pub async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.rooms.delete(&room_id).await? {
        return Err(ApiError::NotFound("room not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

/// Body of a password set/change request.
#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    /// New password digest; absent or empty clears the password
    #[serde(default)]
    pub password: Option<String>,
    /// Current password digest, required when one is already set
    #[serde(default)]
    pub current_password: Option<String>,
}

/// `POST /api/room/:id/password` - set, change, or clear the room password.
/// The initial set requires no prior secret; any change after that does.
pub async fn set_password(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<SetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !rooms::is_valid_room_id(&room_id) {
        return Err(ApiError::Validation("malformed room id".into()));
    }
    state.rooms.ensure(&room_id).await?;

    if let Some(stored_hash) = state.rooms.password_hash(&room_id).await? {
        let verified = match request.current_password {
            Some(current) => auth::verify_digest(current, stored_hash).await,
            None => false,
        };
        if !verified {
            return Err(ApiError::PasswordRequired);
        }
    }

    let new_hash = match request.password.as_deref() {
        Some(digest) if !digest.is_empty() => {
            if digest.len() < auth::MIN_PASSWORD_LEN {
                return Err(ApiError::Validation("password too short".into()));
            }
            Some(auth::hash_digest(digest.to_string()).await?)
        }
        _ => None,
    };

    let has_password = new_hash.is_some();
    state.rooms.set_password_hash(&room_id, new_hash).await?;
    Ok(Json(json!({ "success": true, "has_password": has_password })))
}

/// Body of a password verification request.
#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    /// Password digest to check
    pub password: String,
}

/// `POST /api/room/:id/verify-password` - digest check, public.
pub async fn verify_password(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<VerifyPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !rooms::is_valid_room_id(&room_id) {
        return Err(ApiError::Validation("malformed room id".into()));
    }
    let valid = match state.rooms.password_hash(&room_id).await? {
        Some(stored_hash) => auth::verify_digest(request.password, stored_hash).await,
        None => true,
    };
    Ok(Json(json!({ "valid": valid })))
}

// ---------------------------------------------------------------------------
// Delta state
// ---------------------------------------------------------------------------

/// `GET /api/room/:id?since=&limit=&offset=` - delta state read.
pub async fn room_state(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<StateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.rooms.ensure(&room_id).await?;
    let response = state.reader.fetch(&room_id, query).await?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Stored file row plus the room version the upsert produced.
#[derive(Debug, Serialize)]
pub struct UpsertFileResponse {
    #[serde(flatten)]
    file: FileRecord,
    room_version: i64,
}

/// `POST /api/room/:id/files` - single-file upsert.
pub async fn upsert_file(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<UpsertFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (file, room_version) = state.files.upsert(&room_id, &request).await?;
    Ok(Json(UpsertFileResponse { file, room_version }))
}

/// `DELETE /api/room/:id/files/:file_id` - delete one file, leaving a
/// tombstone at the new room version.
pub async fn delete_file(
    State(state): State<AppState>,
    Path((room_id, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    match state.files.delete(&room_id, &file_id).await? {
        Some(version) => Ok(Json(json!({ "success": true, "version": version }))),
        None => Err(ApiError::NotFound("file not found".into())),
    }
}

// ---------------------------------------------------------------------------
// Chunked sync
// ---------------------------------------------------------------------------

/// Body of a sync `begin` request.
#[derive(Debug, Deserialize)]
pub struct BeginSyncRequest {
    /// Submitting client
    pub client_id: String,
    /// Chunks the client will upload
    pub total_chunks: u32,
    /// Files across all chunks
    pub total_files: u32,
}

/// `POST /api/room/:id/sync/begin`
pub async fn sync_begin(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<BeginSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.client_id.is_empty() {
        return Err(ApiError::Validation("client_id is required".into()));
    }
    if request.total_chunks == 0 {
        return Err(ApiError::Validation("total_chunks must be positive".into()));
    }

    state.rooms.ensure(&room_id).await?;
    let token = state.sessions.begin(
        &room_id,
        &request.client_id,
        request.total_chunks,
        request.total_files,
    );
    Ok(Json(json!({
        "session_token": token,
        "expires_in": state.sessions.ttl().as_secs(),
    })))
}

/// Body of a sync `chunk` request.
#[derive(Debug, Deserialize)]
pub struct ChunkSyncRequest {
    /// Token issued by `begin`
    pub session_token: String,
    /// Zero-based index of this chunk
    pub chunk_index: u32,
    /// Files carried by this chunk
    pub files: Vec<UpsertFileRequest>,
}

/// `POST /api/room/:id/sync/chunk` - upsert one chunk's files. Idempotent
/// under retry of the same chunk, up to version counters.
pub async fn sync_chunk(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<ChunkSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.checkout(&request.session_token, &room_id)?;

    let room_version = state.sync.apply_chunk(&room_id, &request.files).await?;

    let path_hashes = request
        .files
        .iter()
        .map(|file| file.path_hash.clone())
        .collect::<Vec<_>>();
    let progress =
        state
            .sessions
            .record_chunk(&request.session_token, request.chunk_index, path_hashes)?;

    Ok(Json(json!({
        "success": true,
        "chunks_remaining": progress.chunks_remaining,
        "room_version": room_version,
    })))
}

/// Body of a sync `complete` request.
#[derive(Debug, Deserialize)]
pub struct CompleteSyncRequest {
    /// Token issued by `begin`
    pub session_token: String,
}

/// `POST /api/room/:id/sync/complete` - reconcile the room against the
/// session's observed path hashes and return the post-complete state.
pub async fn sync_complete(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<CompleteSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.finish(&request.session_token, &room_id)?;
    state.sync.reconcile(&room_id, &session.path_hashes).await?;

    let response = state
        .reader
        .fetch(
            &room_id,
            StateQuery {
                since: 0,
                limit: None,
                offset: 0,
            },
        )
        .await?;
    Ok(Json(response))
}

/// Body of a single-shot bulk sync.
#[derive(Debug, Deserialize)]
pub struct BulkSyncRequest {
    /// Submitting client; accepted for parity with the chunked protocol
    #[serde(default)]
    pub client_id: Option<String>,
    /// Complete set of files the client holds
    pub files: Vec<UpsertFileRequest>,
}

/// `POST /api/room/:id/sync` - single-shot equivalent of
/// begin + one chunk + complete.
pub async fn sync_bulk(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<BulkSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let observed: HashSet<String> = request
        .files
        .iter()
        .map(|file| file.path_hash.clone())
        .collect();

    state.sync.apply_chunk(&room_id, &request.files).await?;
    state.sync.reconcile(&room_id, &observed).await?;

    let response = state
        .reader
        .fetch(
            &room_id,
            StateQuery {
                since: 0,
                limit: None,
                offset: 0,
            },
        )
        .await?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Operation log
// ---------------------------------------------------------------------------

/// `POST /api/room/:id/ops` - submit one encrypted edit delta.
pub async fn submit_op(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<SubmitOpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.ops.submit(&room_id, &request).await?;
    Ok(Json(response))
}

/// Query parameters of an operation fetch.
#[derive(Debug, Deserialize)]
pub struct OpsQuery {
    /// Sequence cursor; only ops past it are returned
    #[serde(default)]
    pub since: i64,
    /// Optional path-hash filter
    #[serde(default)]
    pub file: Option<String>,
}

/// `GET /api/room/:id/ops?since=&file=`
pub async fn fetch_ops(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<OpsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.rooms.ensure(&room_id).await?;
    let page = state
        .ops
        .fetch(&room_id, query.since.max(0), query.file.as_deref())
        .await?;
    Ok(Json(page))
}

/// Body of a snapshot compaction request.
#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    /// Client-materialized ciphertext body
    pub content_encrypted: String,
    /// Highest operation sequence the body covers
    pub through_seq: i64,
}

/// `POST /api/room/:id/files/:file_id/snapshot` - replace the file body with
/// a client-materialized compaction and prune the covered ops. The path
/// segment is the file's `path_hash`.
pub async fn snapshot_file(
    State(state): State<AppState>,
    Path((room_id, path_hash)): Path<(String, String)>,
    Json(request): Json<SnapshotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .ops
        .snapshot(
            &room_id,
            &path_hash,
            &request.content_encrypted,
            request.through_seq,
        )
        .await?
    {
        Some(response) => Ok(Json(response)),
        None => Err(ApiError::NotFound("file not found".into())),
    }
}

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

/// Outcome of a changeset or change resolution.
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    success: bool,
    status: ChangesetStatus,
    version: i64,
}

/// `POST /api/room/:id/changesets` - propose a set of file replacements.
pub async fn create_changeset(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<CreateChangesetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.changesets.create(&room_id, &request).await?;
    Ok(Json(view))
}

/// `POST /api/room/:id/changesets/:changeset_id/accept`
pub async fn accept_changeset(
    State(state): State<AppState>,
    Path((room_id, changeset_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_outcome(state.changesets.accept_all(&room_id, &changeset_id).await?)
}

/// `POST /api/room/:id/changesets/:changeset_id/reject`
pub async fn reject_changeset(
    State(state): State<AppState>,
    Path((room_id, changeset_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_outcome(state.changesets.reject_all(&room_id, &changeset_id).await?)
}

/// `POST /api/room/:id/changes/:change_id/accept`
pub async fn accept_change(
    State(state): State<AppState>,
    Path((room_id, change_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_outcome(
        state
            .changesets
            .resolve_change(&room_id, &change_id, true)
            .await?,
    )
}

/// `POST /api/room/:id/changes/:change_id/reject`
pub async fn reject_change(
    State(state): State<AppState>,
    Path((room_id, change_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_outcome(
        state
            .changesets
            .resolve_change(&room_id, &change_id, false)
            .await?,
    )
}

fn resolve_outcome(
    outcome: Option<crate::changesets::ResolveOutcome>,
) -> Result<Json<ResolveResponse>, ApiError> {
    match outcome {
        Some(outcome) => Ok(Json(ResolveResponse {
            success: true,
            status: outcome.changeset_status,
            version: outcome.room_version,
        })),
        None => Err(ApiError::NotFound("changeset or change not found".into())),
    }
}
