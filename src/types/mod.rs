//! Data types for the event log sync server
//!
//! This module contains the event structures shared by the wire protocol,
//! the storage layer and the store sessions.

mod event;

pub use event::{EventEncoded, EventMetadata, EventWithMetadata, ROOT_SEQ_NUM};
