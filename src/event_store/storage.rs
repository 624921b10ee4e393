//! Storage handles shared by all store sessions

use std::sync::Arc;

use super::head_cache::HeadCache;
use super::store::{EventLogStore, EventStoreResult};
use crate::config::SyncConfig;

/// The durable event log plus the local head cache
#[derive(Clone)]
pub struct SyncStorage {
    pub event_log: Arc<EventLogStore>,
    pub head_cache: Arc<HeadCache>,
}

impl SyncStorage {
    /// Open both databases under the configured data directory
    pub fn open(config: &SyncConfig) -> EventStoreResult<Self> {
        Ok(Self {
            event_log: Arc::new(EventLogStore::open(
                config.event_log_path(),
                config.sql_max_parameters,
            )?),
            head_cache: Arc::new(HeadCache::open(config.local_state_path())?),
        })
    }

    /// In-memory storage, used by tests and ephemeral servers
    pub fn in_memory(config: &SyncConfig) -> EventStoreResult<Self> {
        Ok(Self {
            event_log: Arc::new(EventLogStore::open_in_memory(config.sql_max_parameters)?),
            head_cache: Arc::new(HeadCache::open_in_memory()?),
        })
    }
}
