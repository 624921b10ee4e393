//! Encoding and decoding of sync frames
//!
//! Decoding never panics: malformed JSON, a missing or unknown `_tag`, and
//! bad fields all come back as a [`DecodeError`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::messages::{ClientMessage, ServerMessage};

/// Request ID of the keepalive pair answered without decoding
pub const AUTO_PING_REQUEST_ID: &str = "ping";

/// Keepalive request the gateway answers verbatim, without decoding it or
/// involving a store session
pub const AUTO_PING_REQUEST: &str = r#"{"_tag":"WSMessage.Ping","requestId":"ping"}"#;

/// Canned answer to [`AUTO_PING_REQUEST`]
pub const AUTO_PING_RESPONSE: &str = r#"{"_tag":"WSMessage.Pong","requestId":"ping"}"#;

const CLIENT_TAGS: &[&str] = &[
    "WSMessage.PullReq",
    "WSMessage.PushReq",
    "WSMessage.AdminResetRoomReq",
    "WSMessage.AdminInfoReq",
    "WSMessage.Ping",
];

const SERVER_TAGS: &[&str] = &[
    "WSMessage.PullRes",
    "WSMessage.PushAck",
    "WSMessage.PushBroadcast",
    "WSMessage.Error",
    "WSMessage.AdminResetRoomRes",
    "WSMessage.AdminInfoRes",
    "WSMessage.Pong",
];

/// Errors produced while decoding a frame
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("message has no `_tag` field")]
    MissingTag,

    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    #[error("invalid {tag} message: {source}")]
    InvalidFields {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a frame sent by a client
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    decode_tagged(text, CLIENT_TAGS)
}

/// Decode a frame sent by the server
pub fn decode_server_message(text: &str) -> Result<ServerMessage, DecodeError> {
    decode_tagged(text, SERVER_TAGS)
}

/// Encode a client frame
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Encode a server frame
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

fn decode_tagged<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

    let tag = match value.get("_tag") {
        Some(Value::String(tag)) => tag.clone(),
        _ => return Err(DecodeError::MissingTag),
    };
    if !known.contains(&tag.as_str()) {
        return Err(DecodeError::UnknownTag(tag));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { tag, source })
}
