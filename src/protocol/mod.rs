//! Wire protocol for the sync WebSocket channel
//!
//! Every frame is a JSON text message discriminated by its `_tag` field
//! (`"WSMessage.PullReq"`, `"WSMessage.PushAck"`, ...).

mod codec;
mod messages;

pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    DecodeError, AUTO_PING_REQUEST, AUTO_PING_REQUEST_ID, AUTO_PING_RESPONSE,
};
pub use messages::{AdminInfo, ClientMessage, ServerMessage};
