//! WebSocket application state

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::event_store::{EventStoreResult, SyncStorage};
use crate::session::SessionRegistry;

/// Shared application state for WebSocket connections
pub struct AppState {
    /// Live store sessions
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    /// Create a new AppState around an existing registry
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Open on-disk storage and build the state for a config
    pub fn open(config: SyncConfig) -> EventStoreResult<Self> {
        let storage = SyncStorage::open(&config)?;
        Ok(Self::with_storage(storage, config))
    }

    /// Build the state on in-memory storage
    pub fn in_memory(config: SyncConfig) -> EventStoreResult<Self> {
        let storage = SyncStorage::in_memory(&config)?;
        Ok(Self::with_storage(storage, config))
    }

    fn with_storage(storage: SyncStorage, config: SyncConfig) -> Self {
        Self::new(Arc::new(SessionRegistry::new(storage, Arc::new(config))))
    }
}
