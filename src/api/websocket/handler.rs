//! WebSocket connection handler
//!
//! Each connection runs two halves: the reader decodes requests and hands
//! them to the store session, the writer drains the connection's outbox and
//! the store's broadcast channel into the socket.

use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::attachment::ConnectionAttachment;
use super::state::AppState;
use crate::protocol::{
    decode_client_message, encode_server_message, ClientMessage, ServerMessage, AUTO_PING_REQUEST,
    AUTO_PING_RESPONSE,
};
use crate::session::Outbox;

/// Request ID carried by errors that are not answers to a request
pub const BROADCAST_REQUEST_ID: &str = "broadcast";

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Store to sync with (required)
    pub store_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let store_id = match params.store_id.filter(|id| !id.is_empty()) {
        Some(store_id) => store_id,
        None => {
            return (StatusCode::BAD_REQUEST, "storeId search param is required").into_response()
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected a WebSocket upgrade").into_response();
    };

    let attachment = match ConnectionAttachment::new(store_id).serialize() {
        Ok(attachment) => attachment,
        Err(e) => {
            error!(error = %e, "Failed to serialize connection attachment");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, attachment))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, attachment: String) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, state, attachment).await;
}

/// Run one connection until the client goes away, then release its store
async fn serve_connection<S, R, E>(sink: S, mut stream: R, state: Arc<AppState>, attachment: String)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let store_id = match ConnectionAttachment::deserialize(&attachment) {
        Ok(attachment) => attachment.store_id,
        Err(e) => {
            error!(error = %e, "Unreadable connection attachment");
            return;
        }
    };

    let (_, broadcast_rx) = state.registry.attach(&store_id);
    let (outbox, outbox_rx) = Outbox::channel();
    let writer = tokio::spawn(write_frames(sink, outbox_rx, broadcast_rx));

    info!(store_id = %store_id, "Connection opened");

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&state, &attachment, text, &outbox).await,
            Ok(Message::Close(_)) => break, // Client requested close
            // Transport pings are answered by the WebSocket layer itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => debug!(store_id = %store_id, "Ignoring binary frame"),
            Err(e) => {
                debug!(store_id = %store_id, error = %e, "Connection error");
                break;
            }
        }
    }

    drop(outbox);
    writer.abort();
    let _ = writer.await;

    // The broadcast receiver is gone with the writer; the session may go too
    let evicted = state.registry.release(&store_id);
    info!(store_id = %store_id, evicted, "Connection closed");
}

/// Handle one text frame from the client
pub async fn handle_text(state: &AppState, attachment: &str, text: String, outbox: &Outbox) {
    if text == AUTO_PING_REQUEST {
        outbox.send_raw(AUTO_PING_RESPONSE.to_string()).await;
        return;
    }

    let msg = match decode_client_message(&text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Dropping undecodable message");
            return;
        }
    };

    if let ClientMessage::Ping { request_id } = msg {
        outbox.send(&ServerMessage::Pong { request_id }).await;
        return;
    }

    let store_id = match ConnectionAttachment::deserialize(attachment) {
        Ok(attachment) => attachment.store_id,
        Err(e) => {
            error!(error = %e, "Unreadable connection attachment");
            return;
        }
    };

    debug!(store_id = %store_id, request_id = msg.request_id(), "Handling request");
    let session = state.registry.session(&store_id);
    session.handle_message(msg, outbox).await;
}

/// Forward outbox and broadcast frames to the socket
async fn write_frames<S>(
    mut sink: S,
    mut outbox_rx: mpsc::Receiver<String>,
    mut broadcast_rx: broadcast::Receiver<Arc<str>>,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let text = tokio::select! {
            // Responses first: an ack is queued before its own broadcast
            biased;

            frame = outbox_rx.recv() => match frame {
                Some(text) => text,
                None => break,
            },

            result = broadcast_rx.recv() => match result {
                Ok(frame) => frame.to_string(),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Client is too slow, it missed batches and must pull
                    warn!(missed = n, "Connection lagged behind broadcasts");
                    let msg = ServerMessage::error(
                        BROADCAST_REQUEST_ID,
                        format!("Missed {} broadcasts, pull to resync", n),
                    );
                    match encode_server_message(&msg) {
                        Ok(text) => text,
                        Err(_) => continue,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if sink.send(Message::Text(text)).await.is_err() {
            break; // Client disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::protocol::decode_server_message;
    use futures::channel::mpsc as test_channel;

    async fn next_text(rx: &mut test_channel::UnboundedReceiver<Message>) -> ServerMessage {
        match rx.next().await {
            Some(Message::Text(text)) => decode_server_message(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    fn text_frame(msg: &ClientMessage) -> Result<Message, axum::Error> {
        Ok(Message::Text(
            crate::protocol::encode_client_message(msg).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_writer_sends_responses_before_broadcasts() {
        let (sink, mut sent) = test_channel::unbounded::<Message>();
        let (outbox, outbox_rx) = Outbox::channel();
        let (broadcast_tx, broadcast_rx) = broadcast::channel::<Arc<str>>(8);

        broadcast_tx
            .send(Arc::from(
                encode_server_message(&ServerMessage::PushBroadcast { batch: Vec::new() }).unwrap(),
            ))
            .unwrap();
        outbox
            .send(&ServerMessage::PushAck {
                request_id: "a".to_string(),
            })
            .await;

        let writer = tokio::spawn(write_frames(sink, outbox_rx, broadcast_rx));

        assert_eq!(
            next_text(&mut sent).await,
            ServerMessage::PushAck {
                request_id: "a".to_string()
            }
        );
        assert_eq!(
            next_text(&mut sent).await,
            ServerMessage::PushBroadcast { batch: Vec::new() }
        );

        drop(outbox);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_lagging_writer_reports_missed_broadcasts() {
        let (sink, mut sent) = test_channel::unbounded::<Message>();
        let (outbox, outbox_rx) = Outbox::channel();
        let (broadcast_tx, broadcast_rx) = broadcast::channel::<Arc<str>>(2);

        for i in 0..5 {
            let frame = encode_server_message(&ServerMessage::Pong {
                request_id: format!("b{}", i),
            })
            .unwrap();
            broadcast_tx.send(Arc::from(frame)).unwrap();
        }

        let writer = tokio::spawn(write_frames(sink, outbox_rx, broadcast_rx));

        assert_eq!(
            next_text(&mut sent).await,
            ServerMessage::error(BROADCAST_REQUEST_ID, "Missed 3 broadcasts, pull to resync")
        );
        for i in 3..5 {
            assert_eq!(
                next_text(&mut sent).await,
                ServerMessage::Pong {
                    request_id: format!("b{}", i)
                }
            );
        }

        drop(broadcast_tx);
        writer.await.unwrap();
        drop(outbox);
    }

    #[tokio::test]
    async fn test_connection_acks_broadcasts_and_releases_on_close() {
        let state = Arc::new(AppState::in_memory(SyncConfig::default()).unwrap());
        let (incoming, stream) = test_channel::unbounded::<Result<Message, axum::Error>>();
        let (sink, mut sent) = test_channel::unbounded::<Message>();

        let connection = tokio::spawn(serve_connection(
            sink,
            stream,
            Arc::clone(&state),
            ConnectionAttachment::new("room").serialize().unwrap(),
        ));

        let push = ClientMessage::PushReq {
            request_id: "p1".to_string(),
            batch: vec![crate::types::EventEncoded {
                seq_num: 1,
                parent_seq_num: 0,
                name: "todoCreated".to_string(),
                args: None,
                client_id: "client".to_string(),
                session_id: "session".to_string(),
            }],
        };
        incoming.unbounded_send(text_frame(&push)).unwrap();

        assert_eq!(
            next_text(&mut sent).await,
            ServerMessage::PushAck {
                request_id: "p1".to_string()
            }
        );
        match next_text(&mut sent).await {
            ServerMessage::PushBroadcast { batch } => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].event.seq_num, 1);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(state.registry.is_resident("room"));

        incoming.unbounded_send(Ok(Message::Close(None))).unwrap();
        connection.await.unwrap();
        assert!(!state.registry.is_resident("room"));
    }
}
