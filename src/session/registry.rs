//! Session registry - store id to live session
//!
//! Sessions are created on first use and dropped once no connection is
//! attached and no request is in flight. Nothing in a session is
//! authoritative: a dropped session is rebuilt from storage on next use.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::store_session::StoreSession;
use crate::config::SyncConfig;
use crate::event_store::SyncStorage;

/// Registry of live store sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<StoreSession>>>,
    storage: SyncStorage,
    config: Arc<SyncConfig>,
}

impl SessionRegistry {
    pub fn new(storage: SyncStorage, config: Arc<SyncConfig>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            storage,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the session for a store, creating it if needed
    pub fn session(&self, store_id: &str) -> Arc<StoreSession> {
        let mut sessions = self.sessions.lock();
        self.get_or_create(&mut sessions, store_id)
    }

    /// Resolve a store's session and subscribe to its broadcasts
    ///
    /// Both happen under the registry lock so a concurrent `release` cannot
    /// drop the session between lookup and subscription.
    pub fn attach(&self, store_id: &str) -> (Arc<StoreSession>, broadcast::Receiver<Arc<str>>) {
        let mut sessions = self.sessions.lock();
        let session = self.get_or_create(&mut sessions, store_id);
        let rx = session.subscribe();
        (session, rx)
    }

    /// Drop a store's session if nothing references it any more
    ///
    /// Call after the connection's broadcast receiver is gone. A store that
    /// is not resident is a no-op. Returns true when the session was dropped.
    pub fn release(&self, store_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let idle = match sessions.get(store_id) {
            Some(session) => session.subscriber_count() == 0 && Arc::strong_count(session) == 1,
            None => return false,
        };
        if idle {
            sessions.remove(store_id);
            debug!(store_id, "Evicted idle session");
        }
        idle
    }

    /// Whether a session for the store is resident
    pub fn is_resident(&self, store_id: &str) -> bool {
        self.sessions.lock().contains_key(store_id)
    }

    /// Number of resident sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn get_or_create(
        &self,
        sessions: &mut HashMap<String, Arc<StoreSession>>,
        store_id: &str,
    ) -> Arc<StoreSession> {
        if let Some(session) = sessions.get(store_id) {
            return Arc::clone(session);
        }

        debug!(store_id, "Creating session");
        let session = Arc::new(StoreSession::new(
            store_id,
            self.storage.clone(),
            Arc::clone(&self.config),
        ));
        sessions.insert(store_id.to_string(), Arc::clone(&session));
        session
    }
}
