//! Event types for the synchronized event log
//!
//! Events are immutable records appended to a store's history. The server
//! never interprets `name` or `args`; it only orders, persists and
//! redistributes them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Head of a store that has no committed events yet
pub const ROOT_SEQ_NUM: i64 = 0;

/// An event as produced by a client and stored in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEncoded {
    /// Position of this event in the store's history
    pub seq_num: i64,
    /// Sequence number this event was appended after
    pub parent_seq_num: i64,
    /// Semantic event type (opaque to the server)
    pub name: String,
    /// Serialized payload (opaque to the server)
    ///
    /// `None` when the field is absent; an explicit `null` is kept as
    /// `Some(Value::Null)` so it is echoed back unchanged.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub args: Option<Value>,
    pub client_id: String,
    pub session_id: String,
}

impl EventEncoded {
    /// Attach server-side metadata to this event
    pub fn with_created_at(self, created_at: impl Into<String>) -> EventWithMetadata {
        EventWithMetadata {
            event: self,
            metadata: Some(EventMetadata {
                created_at: created_at.into(),
            }),
        }
    }
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Metadata assigned by the server when a batch is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// RFC 3339 commit timestamp
    pub created_at: String,
}

/// An event together with the metadata it was received with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithMetadata {
    pub event: EventEncoded,
    pub metadata: Option<EventMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_uses_camel_case_fields() {
        let event = EventEncoded {
            seq_num: 3,
            parent_seq_num: 2,
            name: "todoCreated".to_string(),
            args: Some(json!({ "id": "t1" })),
            client_id: "client-a".to_string(),
            session_id: "session-a".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["seqNum"], 3);
        assert_eq!(value["parentSeqNum"], 2);
        assert_eq!(value["clientId"], "client-a");
        assert_eq!(value["args"]["id"], "t1");
    }

    #[test]
    fn test_null_and_absent_args_reencode_unchanged() {
        let with_null = r#"{"seqNum":1,"parentSeqNum":0,"name":"x","args":null,"clientId":"c","sessionId":"s"}"#;
        let event: EventEncoded = serde_json::from_str(with_null).unwrap();
        assert_eq!(event.args, Some(Value::Null));
        assert_eq!(serde_json::to_string(&event).unwrap(), with_null);

        let absent = r#"{"seqNum":1,"parentSeqNum":0,"name":"x","clientId":"c","sessionId":"s"}"#;
        let event: EventEncoded = serde_json::from_str(absent).unwrap();
        assert!(event.args.is_none());
        assert_eq!(serde_json::to_string(&event).unwrap(), absent);
    }

    #[test]
    fn test_with_created_at() {
        let event = EventEncoded {
            seq_num: 1,
            parent_seq_num: 0,
            name: "x".to_string(),
            args: None,
            client_id: "c".to_string(),
            session_id: "s".to_string(),
        };
        let with_meta = event.with_created_at("2024-01-01T00:00:00Z");
        assert_eq!(
            with_meta.metadata.unwrap().created_at,
            "2024-01-01T00:00:00Z"
        );
    }
}
