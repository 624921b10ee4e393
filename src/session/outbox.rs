//! Per-connection outbound frame queue

use tokio::sync::mpsc;
use tracing::error;

use crate::protocol::{encode_server_message, ServerMessage};

/// Frames buffered per connection before senders wait for the socket
pub const OUTBOX_CAPACITY: usize = 256;

/// Sending half of a connection's outbound queue
///
/// Responses to a request go through the outbox of the connection that sent
/// it; broadcasts go through the store's broadcast channel instead.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

impl Outbox {
    /// Create an outbox and the receiver the connection writer drains
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (Self { tx }, rx)
    }

    /// Encode and queue a frame. Returns false once the connection is gone.
    pub async fn send(&self, msg: &ServerMessage) -> bool {
        match encode_server_message(msg) {
            Ok(text) => self.tx.send(text).await.is_ok(),
            Err(e) => {
                error!(error = %e, "Failed to encode outbound frame");
                false
            }
        }
    }

    /// Queue an already encoded frame
    pub async fn send_raw(&self, text: String) -> bool {
        self.tx.send(text).await.is_ok()
    }

    /// Wait for room for one frame
    ///
    /// The returned slot sends without waiting, so it can be filled while
    /// holding a lock other connections contend on.
    pub async fn reserve(&self) -> ReservedFrame<'_> {
        ReservedFrame {
            permit: self.tx.reserve().await.ok(),
        }
    }
}

/// Room for exactly one frame in an [`Outbox`]
#[derive(Debug)]
pub struct ReservedFrame<'a> {
    permit: Option<mpsc::Permit<'a, String>>,
}

impl ReservedFrame<'_> {
    /// Encode and queue a frame. Returns false once the connection is gone.
    pub fn send(self, msg: &ServerMessage) -> bool {
        let Some(permit) = self.permit else {
            return false;
        };
        match encode_server_message(msg) {
            Ok(text) => {
                permit.send(text);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to encode outbound frame");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserved_frame_is_delivered() {
        let (outbox, mut rx) = Outbox::channel();
        let slot = outbox.reserve().await;
        assert!(outbox.send(&ServerMessage::error("a", "first")).await);
        assert!(slot.send(&ServerMessage::error("b", "second")));

        assert!(rx.recv().await.unwrap().contains("first"));
        assert!(rx.recv().await.unwrap().contains("second"));
    }

    #[tokio::test]
    async fn test_reserve_on_closed_outbox() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(!outbox.reserve().await.send(&ServerMessage::error("a", "gone")));
    }
}
