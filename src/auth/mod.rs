//! # Room Passwords
//!
//! Optional per-room password gate. The browser hashes the user password
//! with SHA-256 and sends the hex digest; the server stores only an Argon2id
//! hash of that digest and verifies presented digests against it. The server
//! never sees the plaintext password.
//!
//! Argon2 verification is deliberately slow, so both hashing and
//! verification run on the blocking thread pool.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

/// Minimum accepted digest length. The browser always sends a 64-character
/// SHA-256 hex digest; anything shorter than this is a malformed request.
pub const MIN_PASSWORD_LEN: usize = 4;

/// Errors from password hashing
#[derive(Debug, Error)]
pub enum AuthError {
    /// Argon2 hashing failed
    #[error("hashing error: {0}")]
    Hashing(String),

    /// The blocking task was cancelled
    #[error("hashing task failed: {0}")]
    Join(String),
}

/// Hash a client-supplied password digest with Argon2id.
pub async fn hash_digest(digest: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(digest.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Join(e.to_string()))?
}

/// Verify a presented digest against a stored Argon2id hash. The underlying
/// comparison is constant-time. Returns false on any mismatch, including an
/// unparseable stored hash.
pub async fn verify_digest(digest: String, stored_hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(digest.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .unwrap_or(false)
}
