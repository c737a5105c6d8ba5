//! # Sync Session Registry
//!
//! Process-local bookkeeping for multi-request chunked uploads. A session is
//! created by `begin`, fed by each `chunk`, and consumed by `complete`. If
//! the server restarts mid-session the registry is gone and the client
//! retries from `begin`; files already upserted stay visible, and the absent
//! completion means no reconciling deletion is applied.
//!
//! The registry is guarded by a `parking_lot` lock that is never held across
//! an await point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Session registry error types
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token unknown, expired, or bound to a different room
    #[error("sync session expired or unknown")]
    Expired,
}

/// State of one in-flight chunked upload.
#[derive(Debug, Clone)]
pub struct SyncSession {
    /// Opaque session token
    pub token: String,
    /// Owning room
    pub room_id: String,
    /// Submitting client
    pub client_id: String,
    /// Number of chunks the client announced
    pub total_chunks: u32,
    /// Number of files the client announced
    pub total_files: u32,
    /// Distinct chunk indexes received so far
    pub received_chunks: HashSet<u32>,
    /// Every path hash observed across all chunks
    pub path_hashes: HashSet<String>,
    /// Creation time
    pub started_at: Instant,
    /// Last chunk activity
    pub last_active: Instant,
}

impl SyncSession {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_active.elapsed() > ttl
    }

    /// Chunks the client still owes, by announced count.
    pub fn chunks_remaining(&self) -> u32 {
        self.total_chunks
            .saturating_sub(self.received_chunks.len() as u32)
    }
}

/// Progress snapshot returned after a chunk lands.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    /// Chunks the client still owes
    pub chunks_remaining: u32,
}

/// Registry of in-flight sync sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SyncSession>>,
    ttl: Duration,
}

impl SessionRegistry {
    /// Create a registry whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Inactivity window of this registry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session and hand back its token.
    pub fn begin(
        &self,
        room_id: &str,
        client_id: &str,
        total_chunks: u32,
        total_files: u32,
    ) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Instant::now();
        let session = SyncSession {
            token: token.clone(),
            room_id: room_id.to_string(),
            client_id: client_id.to_string(),
            total_chunks,
            total_files,
            received_chunks: HashSet::new(),
            path_hashes: HashSet::new(),
            started_at: now,
            last_active: now,
        };
        self.sessions.write().insert(token.clone(), session);
        token
    }

    /// Validate the token before any database work, touching its activity
    /// clock. Fails when the token is unknown, expired, or owned by another
    /// room.
    pub fn checkout(&self, token: &str, room_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token).ok_or(SessionError::Expired)?;
        if session.is_expired(self.ttl) || session.room_id != room_id {
            return Err(SessionError::Expired);
        }
        session.last_active = Instant::now();
        Ok(())
    }

    /// Record a landed chunk: its index and the path hashes it carried.
    /// Re-delivery of an index updates the observed set but not the count.
    pub fn record_chunk(
        &self,
        token: &str,
        chunk_index: u32,
        path_hashes: impl IntoIterator<Item = String>,
    ) -> Result<ChunkProgress, SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token).ok_or(SessionError::Expired)?;
        session.received_chunks.insert(chunk_index);
        session.path_hashes.extend(path_hashes);
        session.last_active = Instant::now();
        Ok(ChunkProgress {
            chunks_remaining: session.chunks_remaining(),
        })
    }

    /// Consume the session for completion, removing it from the registry.
    /// A mismatched room leaves the session in place.
    pub fn finish(&self, token: &str, room_id: &str) -> Result<SyncSession, SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.remove(token).ok_or(SessionError::Expired)?;
        if session.is_expired(self.ttl) {
            return Err(SessionError::Expired);
        }
        if session.room_id != room_id {
            sessions.insert(token.to_string(), session);
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Drop every expired session, returning how many were discarded.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.ttl));
        before - sessions.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True when no sessions are in flight.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = self.sweep_expired();
                if dropped > 0 {
                    tracing::debug!(dropped, "expired sync sessions discarded");
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, token: &str) {
        if let Some(session) = self.sessions.write().get_mut(token) {
            session.last_active = Instant::now() - self.ttl - Duration::from_secs(1);
        }
    }
}
