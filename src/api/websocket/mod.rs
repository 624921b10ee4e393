//! Connection Gateway
//!
//! Provides the WebSocket endpoint at `/websocket?storeId=<id>`.
//!
//! ## Features
//! - `storeId` is required; requests without it are refused before upgrade
//! - Routing context travels with the connection (`ConnectionAttachment`)
//! - Keepalive pings are answered without touching the store session
//! - Committed batches are fanned out to every connection of the store

pub mod attachment;
pub mod handler;
pub mod state;

pub use attachment::ConnectionAttachment;
pub use handler::{handle_text, ws_handler, BROADCAST_REQUEST_ID};
pub use state::AppState;
