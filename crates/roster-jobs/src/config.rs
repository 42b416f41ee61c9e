//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{JobError, Result};
use crate::workers::WorkerConfig;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default SQLite database holding the job queue (created on first run)
pub const DEFAULT_DATABASE_URL: &str = "sqlite://roster-jobs.db?mode=rwc";

/// Default maximum database connections
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default sleep between lease polls on an empty queue, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default lease heartbeat interval, in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Default heartbeat age before a lease counts as abandoned, in seconds
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 120;

/// Default interval of the stale lease sweeper, in seconds
pub const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 30;

/// Default rows per bulk import flush
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 1000;

/// Default artificial delay per employee creation, in milliseconds
pub const DEFAULT_CREATE_DELAY_MS: u64 = 2000;

/// Default per-subscriber capacity of the notification bus
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub workers: WorkersConfig,
    pub import: ImportConfig,
    pub notifications: NotificationsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Worker runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub lease_timeout_secs: u64,
    pub reclaim_interval_secs: u64,
    pub create_delay_ms: u64,
}

/// Import worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub batch_size: usize,
}

/// Notification bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub bus_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file when present. Unset or unparseable values fall
    /// back to the defaults above.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("ROSTER_DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("ROSTER_DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            },
            workers: WorkersConfig {
                poll_interval_ms: std::env::var("ROSTER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                heartbeat_interval_secs: std::env::var("ROSTER_HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
                lease_timeout_secs: std::env::var("ROSTER_LEASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LEASE_TIMEOUT_SECS),
                reclaim_interval_secs: std::env::var("ROSTER_RECLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RECLAIM_INTERVAL_SECS),
                create_delay_ms: std::env::var("ROSTER_CREATE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CREATE_DELAY_MS),
            },
            import: ImportConfig {
                batch_size: std::env::var("ROSTER_IMPORT_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_IMPORT_BATCH_SIZE),
            },
            notifications: NotificationsConfig {
                bus_capacity: std::env::var("ROSTER_BUS_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BUS_CAPACITY),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(JobError::Config("Database URL cannot be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(JobError::Config(
                "Database max connections must be greater than 0".to_string(),
            ));
        }
        if self.workers.poll_interval_ms == 0 {
            return Err(JobError::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }
        if self.workers.heartbeat_interval_secs == 0 {
            return Err(JobError::Config(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }
        if self.workers.reclaim_interval_secs == 0 {
            return Err(JobError::Config(
                "Reclaim interval must be greater than 0".to_string(),
            ));
        }
        if self.workers.lease_timeout_secs <= self.workers.heartbeat_interval_secs {
            return Err(JobError::Config(
                "Lease timeout must exceed the heartbeat interval".to_string(),
            ));
        }
        if self.import.batch_size == 0 {
            return Err(JobError::Config(
                "Import batch size must be greater than 0".to_string(),
            ));
        }
        if self.notifications.bus_capacity == 0 {
            return Err(JobError::Config(
                "Notification bus capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker runtime timings derived from this configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.workers.poll_interval_ms),
            heartbeat_interval: Duration::from_secs(self.workers.heartbeat_interval_secs),
            lease_timeout: Duration::from_secs(self.workers.lease_timeout_secs),
            reclaim_interval: Duration::from_secs(self.workers.reclaim_interval_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            workers: WorkersConfig {
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
                lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
                reclaim_interval_secs: DEFAULT_RECLAIM_INTERVAL_SECS,
                create_delay_ms: DEFAULT_CREATE_DELAY_MS,
            },
            import: ImportConfig {
                batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            },
            notifications: NotificationsConfig {
                bus_capacity: DEFAULT_BUS_CAPACITY,
            },
        }
    }
}
