//! # Retention Sweep
//!
//! Background task that removes rooms idle past the configured retention
//! window (cascading to every dependent row) and prunes tombstones that have
//! fallen behind the pruning horizon. Bounded tombstone history keeps
//! `since`-based delta reads honest without unbounded growth.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::database::{ConnectionPool, Result};

/// Outcome of a single sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Rooms removed for inactivity
    pub rooms_deleted: u64,
    /// Tombstones pruned past the horizon
    pub tombstones_pruned: u64,
}

/// Periodic sweeper over rooms and tombstones.
#[derive(Clone)]
pub struct RetentionSweeper {
    pool: ConnectionPool,
    config: Arc<ServerConfig>,
}

impl RetentionSweeper {
    /// Create a sweeper bound to the given pool and configuration.
    pub fn new(pool: ConnectionPool, config: Arc<ServerConfig>) -> Self {
        Self { pool, config }
    }

    /// Run one sweep pass.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention_window())
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let rooms = sqlx::query("DELETE FROM rooms WHERE updated_at < ?1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await?;

        let tombstones = sqlx::query(
            "DELETE FROM deleted_files WHERE deleted_at_version < \
             (SELECT version FROM rooms WHERE rooms.id = deleted_files.room_id) - ?1",
        )
        .bind(self.config.tombstone_horizon)
        .execute(self.pool.pool())
        .await?;

        let stats = SweepStats {
            rooms_deleted: rooms.rows_affected(),
            tombstones_pruned: tombstones.rows_affected(),
        };

        if stats != SweepStats::default() {
            tracing::info!(
                rooms = stats.rooms_deleted,
                tombstones = stats.tombstones_pruned,
                "retention sweep"
            );
        }
        Ok(stats)
    }

    /// Spawn the sweep loop. Runs until the process exits.
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        })
    }
}
