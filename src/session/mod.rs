//! Store sessions
//!
//! One `StoreSession` per store id serializes pushes, serves pulls, handles
//! admin requests and fans committed batches out to attached connections.
//! The `SessionRegistry` creates sessions lazily and evicts idle ones.

mod outbox;
mod registry;
mod store_session;

pub use outbox::{Outbox, ReservedFrame, OUTBOX_CAPACITY};
pub use registry::SessionRegistry;
pub use store_session::{
    pull_frames, HeadState, PushOutcome, StoreSession, INVALID_ADMIN_SECRET_MESSAGE,
    UNEXPECTED_ERROR_MESSAGE,
};
