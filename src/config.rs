//! Server configuration
//!
//! Settings come from `SYNC_*` environment variables, falling back to the
//! defaults below.
//!
//! ```bash
//! SYNC_BIND_ADDR=0.0.0.0:8787
//! SYNC_DATA_DIR=/var/lib/eventlog-sync
//! SYNC_ADMIN_SECRET=change-me
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default number of events per pull response frame
pub const DEFAULT_PULL_CHUNK_SIZE: usize = 100;

/// Default bound-parameter ceiling of the SQL backend
pub const DEFAULT_SQL_MAX_PARAMETERS: usize = 100;

/// Default per-store broadcast buffer (frames)
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the sync server
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Directory holding the event log and local state databases
    pub data_dir: PathBuf,
    /// Shared secret for admin requests; admin is disabled when unset
    pub admin_secret: Option<String>,
    /// Maximum events per pull response frame
    pub pull_chunk_size: usize,
    /// Maximum bound parameters per SQL statement
    pub sql_max_parameters: usize,
    /// Broadcast buffer per store before slow clients start lagging
    pub broadcast_capacity: usize,
    /// Whether an admin reset also deletes the durable log rows
    pub reset_purges_log: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            data_dir: PathBuf::from("data"),
            admin_secret: None,
            pull_chunk_size: DEFAULT_PULL_CHUNK_SIZE,
            sql_max_parameters: DEFAULT_SQL_MAX_PARAMETERS,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            reset_purges_log: true,
        }
    }
}

impl SyncConfig {
    /// Create config with a custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("SYNC_BIND_ADDR") {
            config.bind_addr = parse_value("SYNC_BIND_ADDR", value)?;
        }
        if let Some(value) = lookup("SYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        config.admin_secret = lookup("SYNC_ADMIN_SECRET").filter(|s| !s.is_empty());
        if let Some(value) = lookup("SYNC_PULL_CHUNK_SIZE") {
            config.pull_chunk_size = parse_positive("SYNC_PULL_CHUNK_SIZE", value)?;
        }
        if let Some(value) = lookup("SYNC_SQL_MAX_PARAMETERS") {
            config.sql_max_parameters = parse_positive("SYNC_SQL_MAX_PARAMETERS", value)?;
        }
        if let Some(value) = lookup("SYNC_BROADCAST_CAPACITY") {
            config.broadcast_capacity = parse_positive("SYNC_BROADCAST_CAPACITY", value)?;
        }
        if let Some(value) = lookup("SYNC_RESET_PURGES_LOG") {
            config.reset_purges_log = parse_value("SYNC_RESET_PURGES_LOG", value)?;
        }

        Ok(config)
    }

    /// Get path to the durable event log database
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("eventlog.db")
    }

    /// Get path to the local state (head cache) database
    pub fn local_state_path(&self) -> PathBuf {
        self.data_dir.join("local.db")
    }
}

fn parse_value<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_positive(key: &'static str, value: String) -> Result<usize, ConfigError> {
    let parsed: usize = parse_value(key, value.clone())?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
