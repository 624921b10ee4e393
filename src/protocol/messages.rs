//! Message envelope types
//!
//! `ClientMessage` covers client → server requests, `ServerMessage` covers
//! responses and broadcasts.

use serde::{Deserialize, Serialize};

use crate::types::{EventEncoded, EventWithMetadata};

/// Messages sent by clients over the sync socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum ClientMessage {
    /// Request all events after `cursor` (or all events)
    #[serde(rename = "WSMessage.PullReq", rename_all = "camelCase")]
    PullReq {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<i64>,
    },

    /// Append a batch of events after the current head
    #[serde(rename = "WSMessage.PushReq", rename_all = "camelCase")]
    PushReq {
        request_id: String,
        batch: Vec<EventEncoded>,
    },

    /// Reset the store (privileged)
    #[serde(rename = "WSMessage.AdminResetRoomReq", rename_all = "camelCase")]
    AdminResetRoomReq {
        request_id: String,
        admin_secret: String,
    },

    /// Ask which session instance hosts the store (privileged)
    #[serde(rename = "WSMessage.AdminInfoReq", rename_all = "camelCase")]
    AdminInfoReq {
        request_id: String,
        admin_secret: String,
    },

    /// Keepalive, answered by the gateway
    #[serde(rename = "WSMessage.Ping", rename_all = "camelCase")]
    Ping { request_id: String },
}

impl ClientMessage {
    /// Request ID used to correlate the response
    pub fn request_id(&self) -> &str {
        match self {
            ClientMessage::PullReq { request_id, .. }
            | ClientMessage::PushReq { request_id, .. }
            | ClientMessage::AdminResetRoomReq { request_id, .. }
            | ClientMessage::AdminInfoReq { request_id, .. }
            | ClientMessage::Ping { request_id } => request_id,
        }
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum ServerMessage {
    /// One chunk of a pull response
    #[serde(rename = "WSMessage.PullRes", rename_all = "camelCase")]
    PullRes {
        request_id: String,
        batch: Vec<EventWithMetadata>,
        /// Events still to come after this chunk
        remaining: usize,
    },

    #[serde(rename = "WSMessage.PushAck", rename_all = "camelCase")]
    PushAck { request_id: String },

    /// A committed batch, delivered to every attached connection
    #[serde(rename = "WSMessage.PushBroadcast", rename_all = "camelCase")]
    PushBroadcast { batch: Vec<EventWithMetadata> },

    #[serde(rename = "WSMessage.Error", rename_all = "camelCase")]
    Error { request_id: String, message: String },

    #[serde(rename = "WSMessage.AdminResetRoomRes", rename_all = "camelCase")]
    AdminResetRoomRes { request_id: String },

    #[serde(rename = "WSMessage.AdminInfoRes", rename_all = "camelCase")]
    AdminInfoRes { request_id: String, info: AdminInfo },

    #[serde(rename = "WSMessage.Pong", rename_all = "camelCase")]
    Pong { request_id: String },
}

impl ServerMessage {
    /// Create an error frame for a request
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id: request_id.into(),
            message: message.into(),
        }
    }
}

/// Identity of the session hosting a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminInfo {
    pub durable_object_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_of_every_request() {
        let requests = [
            ClientMessage::PullReq {
                request_id: "pull".to_string(),
                cursor: Some(4),
            },
            ClientMessage::PushReq {
                request_id: "push".to_string(),
                batch: Vec::new(),
            },
            ClientMessage::AdminInfoReq {
                request_id: "info".to_string(),
                admin_secret: "s".to_string(),
            },
            ClientMessage::Ping {
                request_id: "ping".to_string(),
            },
        ];
        let ids: Vec<&str> = requests.iter().map(ClientMessage::request_id).collect();
        assert_eq!(ids, vec!["pull", "push", "info", "ping"]);
    }
}
