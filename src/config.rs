//! # Server Configuration
//!
//! Environment-driven configuration for the LivePaste server:
//!
//! - `DATABASE_URL` - SQLite connection string
//! - `PORT` - HTTP listener port (default 8080)
//! - `RETENTION_HOURS` - room lifetime, clamped to [1, 120] (default 24)
//! - `LIVEPASTE_ASSET` - optional override for the bundled client asset

use std::path::PathBuf;
use std::time::Duration;

/// Minimum accepted value for `RETENTION_HOURS`.
pub const RETENTION_HOURS_MIN: u64 = 1;

/// Maximum accepted value for `RETENTION_HOURS`.
pub const RETENTION_HOURS_MAX: u64 = 120;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Database URL (e.g. "sqlite://livepaste.db?mode=rwc")
    pub database_url: String,

    /// HTTP listener port
    pub port: u16,

    /// Hours of inactivity after which a room is removed
    pub retention_hours: u64,

    /// How far behind the room version a tombstone may trail before
    /// the sweep prunes it
    pub tombstone_horizon: i64,

    /// Interval between retention sweeps
    pub sweep_interval: Duration,

    /// Inactivity window after which a sync session expires
    pub session_ttl: Duration,

    /// Interval between sync-session sweeps
    pub session_sweep_interval: Duration,

    /// Maximum number of operations returned per fetch
    pub ops_page_size: i64,

    /// Default page size for delta state reads
    pub state_page_size: i64,

    /// Optional on-disk override for the single-file client asset
    pub asset_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://livepaste.db?mode=rwc".to_string(),
            port: 8080,
            retention_hours: 24,
            tombstone_horizon: 100,
            sweep_interval: Duration::from_secs(60 * 60),
            session_ttl: Duration::from_secs(5 * 60),
            session_sweep_interval: Duration::from_secs(60),
            ops_page_size: 1000,
            state_page_size: 1000,
            asset_path: None,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything absent or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PORT"),
            }
        }

        if let Ok(hours) = std::env::var("RETENTION_HOURS") {
            match hours.parse::<u64>() {
                Ok(h) => config.retention_hours = clamp_retention_hours(h),
                Err(_) => tracing::warn!(value = %hours, "ignoring unparseable RETENTION_HOURS"),
            }
        }

        if let Ok(asset) = std::env::var("LIVEPASTE_ASSET") {
            if !asset.is_empty() {
                config.asset_path = Some(PathBuf::from(asset));
            }
        }

        config
    }

    /// Room retention window as a `Duration`.
    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}

fn clamp_retention_hours(hours: u64) -> u64 {
    hours.clamp(RETENTION_HOURS_MIN, RETENTION_HOURS_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_hours_clamped() {
        assert_eq!(clamp_retention_hours(0), 1);
        assert_eq!(clamp_retention_hours(24), 24);
        assert_eq!(clamp_retention_hours(500), 120);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.tombstone_horizon, 100);
        assert_eq!(config.session_ttl, Duration::from_secs(300));
    }
}
