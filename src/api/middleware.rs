//! # Room Password Gate
//!
//! Route layer over every protected endpoint. The browser sends the hex
//! SHA-256 digest of the user password in the `X-Room-Password` header (or a
//! `password` query parameter); the layer verifies it against the room's
//! stored Argon2id hash. Rooms without a password pass through untouched, as
//! do rooms that do not exist yet — those are created lazily by the handler
//! they were addressed to.

use axum::extract::{RawPathParams, Request, State};
use axum::http::header::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::responses::ApiError;
use crate::api::AppState;
use crate::auth;
use crate::rooms;

/// Header carrying the client's password digest.
pub const ROOM_PASSWORD_HEADER: &str = "x-room-password";

/// Reject requests whose room password digest does not verify.
pub async fn require_room_access(
    State(state): State<AppState>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let room_id = params
        .iter()
        .find(|(name, _)| *name == "id")
        .map(|(_, value)| value.to_string())
        .ok_or_else(|| ApiError::Internal("protected route without a room id".into()))?;

    if !rooms::is_valid_room_id(&room_id) {
        return Err(ApiError::Validation("malformed room id".into()));
    }

    if let Some(stored_hash) = state.rooms.password_hash(&room_id).await? {
        let digest = presented_digest(request.headers(), request.uri().query());
        let verified = match digest {
            Some(digest) => auth::verify_digest(digest, stored_hash).await,
            None => false,
        };
        if !verified {
            return Err(ApiError::PasswordRequired);
        }
    }

    Ok(next.run(request).await)
}

/// Digest from the `X-Room-Password` header, falling back to the `password`
/// query parameter.
pub(crate) fn presented_digest(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(ROOM_PASSWORD_HEADER) {
        if let Ok(digest) = value.to_str() {
            if !digest.is_empty() {
                return Some(digest.to_string());
            }
        }
    }

    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            pair.strip_prefix("password=")
                .filter(|digest| !digest.is_empty())
                .map(|digest| digest.to_string())
        })
    })
}
