//! # API Error Envelope
//!
//! Every handler failure funnels into [`ApiError`], which maps the error
//! taxonomy onto HTTP statuses:
//!
//! - 400 validation problems and expired sync sessions
//! - 401 with `password_required: true` for the room password gate
//! - 404 unknown file / changeset / change / room
//! - 409 operation conflicts, carrying the ops the client must rebase onto
//! - 500 transient database failures (the transaction has been rolled back)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::changesets::ChangesetError;
use crate::database::DatabaseError;
use crate::files::FileError;
use crate::ops::{ConflictingOp, OpError};
use crate::sync::{SessionError, SyncError};

/// API error response
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request; the caller can correct and retry
    Validation(String),
    /// The room requires a password and the presented digest did not verify
    PasswordRequired,
    /// The addressed resource does not exist
    NotFound(String),
    /// Sync session token unknown or timed out
    SessionExpired,
    /// Operation submission raced a concurrent writer
    OpConflict {
        /// File version after the concurrent writes
        current_version: i64,
        /// Version the submitting client was editing against
        base_version: i64,
        /// Ops the client must rebase onto
        conflicting_ops: Vec<ConflictingOp>,
    },
    /// Unexpected server-side failure; safe to retry
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "code": "validation" }),
            ),
            ApiError::PasswordRequired => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "password required", "password_required": true }),
            ),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": what, "code": "not_found" }),
            ),
            ApiError::SessionExpired => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "sync session expired or unknown", "code": "session_expired" }),
            ),
            ApiError::OpConflict {
                current_version,
                base_version,
                conflicting_ops,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "operation conflict",
                    "code": "conflict",
                    "current_version": current_version,
                    "base_version": base_version,
                    "conflicting_ops": conflicting_ops,
                }),
            ),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error", "code": "internal" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<FileError> for ApiError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Validation(message) => ApiError::Validation(message),
            FileError::Database(db) => db.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Validation(message) => ApiError::Validation(message),
            SyncError::Database(db) => db.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(_: SessionError) -> Self {
        ApiError::SessionExpired
    }
}

impl From<OpError> for ApiError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::Validation(message) => ApiError::Validation(message),
            OpError::Conflict {
                current_version,
                base_version,
                conflicting_ops,
            } => ApiError::OpConflict {
                current_version,
                base_version,
                conflicting_ops,
            },
            OpError::Database(db) => db.into(),
        }
    }
}

impl From<ChangesetError> for ApiError {
    fn from(e: ChangesetError) -> Self {
        match e {
            ChangesetError::Validation(message) => ApiError::Validation(message),
            ChangesetError::Database(db) => db.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PasswordRequired.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::SessionExpired.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::OpConflict {
                current_version: 2,
                base_version: 1,
                conflicting_ops: vec![],
            }
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
    }
}
