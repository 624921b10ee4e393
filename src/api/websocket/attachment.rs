//! Connection attachment
//!
//! Routing context serialized onto the connection at upgrade time. Every
//! inbound message recovers its store id from here rather than from a
//! server-side table, so a connection whose session was evicted and rebuilt
//! still reaches the right store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAttachment {
    pub store_id: String,
}

impl ConnectionAttachment {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
        }
    }

    /// Serialize for storage on the connection
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Recover the attachment from its serialized form
    pub fn deserialize(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_format() {
        let raw = ConnectionAttachment::new("room-7").serialize().unwrap();
        assert_eq!(raw, r#"{"storeId":"room-7"}"#);
        assert_eq!(
            ConnectionAttachment::deserialize(&raw).unwrap(),
            ConnectionAttachment::new("room-7")
        );
    }
}
