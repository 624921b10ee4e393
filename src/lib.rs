//! Event Log Sync Server
//!
//! A server that lets many clients append concurrently to per-store event
//! logs and see each other's changes in near real time, over WebSocket.
//!
//! # Features
//!
//! - **Single writer per store**: pushes are serialized and validated
//!   against the store head (optimistic concurrency)
//! - **Durable**: one append-only SQLite table per store and format version
//! - **Real-time**: committed batches are broadcast to every connection
//! - **Chunked pulls**: large backfills arrive in frames with a `remaining` count
//! - **Recoverable**: sessions are rebuilt from storage after eviction
//!
//! # Modules
//!
//! - `types`: Event structures
//! - `protocol`: WebSocket message envelope and codec
//! - `event_store`: Durable event tables and the local head cache
//! - `session`: Store sessions and the session registry
//! - `api`: HTTP router and WebSocket gateway
//! - `config`: Environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventlog_sync::api::{http::create_router, websocket::AppState};
//! use eventlog_sync::SyncConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let addr = config.bind_addr;
//! let state = Arc::new(AppState::open(config)?);
//! let listener = tokio::net::TcpListener::bind(addr).await?;
//! axum::serve(listener, create_router(state)).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod event_store;
pub mod protocol;
pub mod session;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{ConfigError, SyncConfig};
pub use event_store::{EventLogStore, EventStoreError, HeadCache, SyncStorage};
pub use protocol::{ClientMessage, DecodeError, ServerMessage};
pub use session::{Outbox, PushOutcome, SessionRegistry, StoreSession};
pub use types::{EventEncoded, EventMetadata, EventWithMetadata};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
