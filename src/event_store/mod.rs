//! Event Log Store
//!
//! Durable storage for the synchronized event logs:
//! - `EventLogStore`: one append-only SQLite table per store and format version
//! - `HeadCache`: fast local copy of each store's head for session recovery
//! - `naming`: safe table names and parameter-bounded insert statements
//!
//! # Layout
//!
//! ```text
//! eventlog.db                         local.db
//! ┌──────────────────────────────┐    ┌─────────────────────┐
//! │ eventlog_7_<store>           │    │ store_heads         │
//! │ seqNum | parentSeqNum | ...  │    │ storeId | head      │
//! └──────────────────────────────┘    └─────────────────────┘
//! ```

mod head_cache;
pub mod naming;
mod storage;
mod store;

pub use head_cache::HeadCache;
pub use naming::PERSISTENCE_FORMAT_VERSION;
pub use storage::SyncStorage;
pub use store::{EventLogStore, EventStoreError, EventStoreResult};
