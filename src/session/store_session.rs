//! Store Session - the single writer of one store's history
//!
//! A session owns the in-memory head of its store. Pushes are serialized
//! by the head mutex: a push holds it from head resolution until the new
//! head is recorded and broadcast, so two pushes can never validate against
//! the same head and broadcasts leave in commit order. Pulls read storage
//! directly and never take the lock.
//!
//! Durable writes run after the lock is released, each holding a shared
//! guard on the persist gate. A reset takes the gate exclusively, so it
//! purges only after every acknowledged batch has landed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::outbox::Outbox;
use crate::config::SyncConfig;
use crate::event_store::{naming::encode_store_id, EventStoreResult, SyncStorage};
use crate::protocol::{encode_server_message, AdminInfo, ClientMessage, ServerMessage};
use crate::types::{EventEncoded, EventWithMetadata, ROOT_SEQ_NUM};

/// Message sent to clients in place of internal storage errors
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected error";

/// Message sent when an admin secret does not match
pub const INVALID_ADMIN_SECRET_MESSAGE: &str = "Invalid admin secret";

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Head state of a store as known by its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    /// Not loaded since the session was (re)constructed
    Uninitialized,
    /// Last committed `seqNum`
    Known(i64),
}

/// Result of handling a push request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Empty batch, acknowledged without any state change
    Empty,
    /// Batch committed; the store head moved to `head`
    Accepted { head: i64 },
    /// Batch refused; nothing changed
    Rejected { message: String },
    /// Storage failed before the batch could be validated
    Failed,
}

/// The single-writer actor for one store
pub struct StoreSession {
    store_id: String,
    instance_id: String,
    head: Mutex<HeadState>,
    persist_gate: Arc<RwLock<()>>,
    broadcast_tx: broadcast::Sender<Arc<str>>,
    storage: SyncStorage,
    config: Arc<SyncConfig>,
}

impl StoreSession {
    /// Create a session in the `Uninitialized` state
    pub fn new(store_id: impl Into<String>, storage: SyncStorage, config: Arc<SyncConfig>) -> Self {
        let store_id = store_id.into();
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);
        let instance_id = format!(
            "{}-{:x}-{}",
            encode_store_id(&store_id),
            chrono::Utc::now().timestamp_micros(),
            INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        Self {
            store_id,
            instance_id,
            head: Mutex::new(HeadState::Uninitialized),
            persist_gate: Arc::new(RwLock::new(())),
            broadcast_tx,
            storage,
            config,
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Identity of this session instance, reported by `AdminInfoReq`
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Subscribe to batches committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.broadcast_tx.subscribe()
    }

    /// Number of connections currently receiving broadcasts
    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }

    /// Head state without resolving it (waits for an in-flight push)
    pub async fn head_state(&self) -> HeadState {
        *self.head.lock().await
    }

    /// Current head, loading it from storage if needed
    pub async fn current_head(&self) -> EventStoreResult<i64> {
        let mut head = self.head.lock().await;
        self.resolve_head(&mut head).await
    }

    /// Dispatch one decoded client request
    pub async fn handle_message(&self, msg: ClientMessage, outbox: &Outbox) {
        match msg {
            ClientMessage::PullReq { request_id, cursor } => {
                self.handle_pull(&request_id, cursor, outbox).await;
            }
            ClientMessage::PushReq { request_id, batch } => {
                self.handle_push(&request_id, batch, outbox).await;
            }
            ClientMessage::AdminResetRoomReq {
                request_id,
                admin_secret,
            } => {
                self.handle_admin_reset(&request_id, &admin_secret, outbox)
                    .await;
            }
            ClientMessage::AdminInfoReq {
                request_id,
                admin_secret,
            } => {
                self.handle_admin_info(&request_id, &admin_secret, outbox)
                    .await;
            }
            ClientMessage::Ping { request_id } => {
                outbox.send(&ServerMessage::Pong { request_id }).await;
            }
        }
    }

    /// Send every event after `cursor`, in frames of at most
    /// `pull_chunk_size` events
    pub async fn handle_pull(&self, request_id: &str, cursor: Option<i64>, outbox: &Outbox) {
        let events = match self
            .storage
            .event_log
            .get_events(&self.store_id, cursor)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                error!(store_id = %self.store_id, request_id, error = %e, "Pull failed");
                outbox
                    .send(&ServerMessage::error(request_id, UNEXPECTED_ERROR_MESSAGE))
                    .await;
                return;
            }
        };

        debug!(
            store_id = %self.store_id,
            request_id,
            ?cursor,
            events = events.len(),
            "Serving pull"
        );

        for frame in pull_frames(request_id, events, self.config.pull_chunk_size) {
            if !outbox.send(&frame).await {
                break;
            }
        }
    }

    /// Validate and commit a batch, then broadcast it
    ///
    /// The ack and the broadcast go out before the durable write completes;
    /// a failed write after that point is logged and cannot be retracted.
    pub async fn handle_push(
        &self,
        request_id: &str,
        batch: Vec<EventEncoded>,
        outbox: &Outbox,
    ) -> PushOutcome {
        if batch.is_empty() {
            outbox
                .send(&ServerMessage::PushAck {
                    request_id: request_id.to_string(),
                })
                .await;
            return PushOutcome::Empty;
        }

        if let Err(message) = check_batch(&batch) {
            warn!(store_id = %self.store_id, request_id, %message, "Rejected malformed batch");
            outbox.send(&ServerMessage::error(request_id, &message)).await;
            return PushOutcome::Rejected { message };
        }

        let first_parent = batch[0].parent_seq_num;
        let new_head = batch[batch.len() - 1].seq_num;

        // Reserved outside the lock; filling it under the lock never waits
        let reply = outbox.reserve().await;
        let mut head = self.head.lock().await;

        let current = match self.resolve_head(&mut head).await {
            Ok(current) => current,
            Err(e) => {
                error!(store_id = %self.store_id, request_id, error = %e, "Could not load head");
                reply.send(&ServerMessage::error(request_id, UNEXPECTED_ERROR_MESSAGE));
                return PushOutcome::Failed;
            }
        };

        if first_parent != current {
            let message = format!(
                "Invalid parent event number. Received e{} but expected e{}",
                first_parent, current
            );
            info!(store_id = %self.store_id, request_id, received = first_parent, expected = current, "Push conflict");
            reply.send(&ServerMessage::error(request_id, &message));
            return PushOutcome::Rejected { message };
        }

        reply.send(&ServerMessage::PushAck {
            request_id: request_id.to_string(),
        });

        *head = HeadState::Known(new_head);
        if let Err(e) = self.storage.head_cache.put(&self.store_id, new_head).await {
            warn!(store_id = %self.store_id, head = new_head, error = %e, "Failed to cache head");
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let gate = Arc::clone(&self.persist_gate).read_owned().await;

        let persist = {
            let event_log = Arc::clone(&self.storage.event_log);
            let store_id = self.store_id.clone();
            let batch = batch.clone();
            let created_at = created_at.clone();
            tokio::spawn(async move {
                let result = event_log.append_events(&store_id, batch, created_at).await;
                drop(gate);
                result
            })
        };

        self.broadcast(batch, &created_at);
        drop(head);

        match persist.await {
            Ok(Ok(())) => {
                debug!(store_id = %self.store_id, request_id, head = new_head, "Batch persisted");
            }
            Ok(Err(e)) => {
                error!(
                    store_id = %self.store_id,
                    request_id,
                    from = first_parent + 1,
                    to = new_head,
                    error = %e,
                    "Persisting acknowledged batch failed"
                );
            }
            Err(e) => {
                error!(store_id = %self.store_id, request_id, error = %e, "Persist task aborted");
            }
        }

        PushOutcome::Accepted { head: new_head }
    }

    /// Clear the store's cached head (and durable log when configured)
    ///
    /// Waits for acknowledged batches still being written, so nothing
    /// committed before the reset reappears after it.
    pub async fn handle_admin_reset(&self, request_id: &str, admin_secret: &str, outbox: &Outbox) {
        if !self.is_admin(admin_secret) {
            warn!(store_id = %self.store_id, request_id, "Admin reset with invalid secret");
            outbox
                .send(&ServerMessage::error(request_id, INVALID_ADMIN_SECRET_MESSAGE))
                .await;
            return;
        }

        let mut head = self.head.lock().await;
        let persisted = self.persist_gate.write().await;

        let result = async {
            self.storage.head_cache.clear(&self.store_id).await?;
            if self.config.reset_purges_log {
                self.storage.event_log.purge(&self.store_id).await?;
            }
            Ok::<_, crate::event_store::EventStoreError>(())
        }
        .await;

        *head = HeadState::Uninitialized;
        drop(persisted);
        drop(head);

        if let Err(e) = result {
            error!(store_id = %self.store_id, request_id, error = %e, "Admin reset failed");
            outbox
                .send(&ServerMessage::error(request_id, UNEXPECTED_ERROR_MESSAGE))
                .await;
            return;
        }

        info!(
            store_id = %self.store_id,
            purged_log = self.config.reset_purges_log,
            "Store reset"
        );
        outbox
            .send(&ServerMessage::AdminResetRoomRes {
                request_id: request_id.to_string(),
            })
            .await;
    }

    /// Report which session instance hosts the store
    pub async fn handle_admin_info(&self, request_id: &str, admin_secret: &str, outbox: &Outbox) {
        if !self.is_admin(admin_secret) {
            warn!(store_id = %self.store_id, request_id, "Admin info with invalid secret");
            outbox
                .send(&ServerMessage::error(request_id, INVALID_ADMIN_SECRET_MESSAGE))
                .await;
            return;
        }

        outbox
            .send(&ServerMessage::AdminInfoRes {
                request_id: request_id.to_string(),
                info: AdminInfo {
                    durable_object_id: self.instance_id.clone(),
                },
            })
            .await;
    }

    fn is_admin(&self, admin_secret: &str) -> bool {
        matches!(&self.config.admin_secret, Some(expected) if expected == admin_secret)
    }

    /// Resolve the head: memory, then local cache, then durable log, then root
    async fn resolve_head(&self, head: &mut HeadState) -> EventStoreResult<i64> {
        if let HeadState::Known(current) = *head {
            return Ok(current);
        }

        let loaded = match self.storage.head_cache.get(&self.store_id).await? {
            Some(cached) => cached,
            None => self
                .storage
                .event_log
                .head(&self.store_id)
                .await?
                .unwrap_or(ROOT_SEQ_NUM),
        };

        debug!(store_id = %self.store_id, head = loaded, "Loaded head");
        *head = HeadState::Known(loaded);
        Ok(loaded)
    }

    fn broadcast(&self, batch: Vec<EventEncoded>, created_at: &str) {
        let msg = ServerMessage::PushBroadcast {
            batch: batch
                .into_iter()
                .map(|event| event.with_created_at(created_at))
                .collect(),
        };

        match encode_server_message(&msg) {
            Ok(frame) => {
                // Ignore send errors - they just mean no connection is attached
                let _ = self.broadcast_tx.send(Arc::from(frame));
            }
            Err(e) => {
                error!(store_id = %self.store_id, error = %e, "Failed to encode broadcast");
            }
        }
    }
}

/// Split pull results into response frames
///
/// Always yields at least one frame; each frame carries the number of events
/// still to come after it, so the last one has `remaining == 0`.
pub fn pull_frames(
    request_id: &str,
    events: Vec<EventWithMetadata>,
    chunk_size: usize,
) -> Vec<ServerMessage> {
    let chunk_size = chunk_size.max(1);
    let total = events.len();

    if total == 0 {
        return vec![ServerMessage::PullRes {
            request_id: request_id.to_string(),
            batch: Vec::new(),
            remaining: 0,
        }];
    }

    let mut frames = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut sent = 0;
    let mut events = events.into_iter().peekable();
    while events.peek().is_some() {
        let batch: Vec<EventWithMetadata> = events.by_ref().take(chunk_size).collect();
        sent += batch.len();
        frames.push(ServerMessage::PullRes {
            request_id: request_id.to_string(),
            batch,
            remaining: total - sent,
        });
    }
    frames
}

/// A batch must extend itself one event at a time
fn check_batch(batch: &[EventEncoded]) -> Result<(), String> {
    for (i, event) in batch.iter().enumerate() {
        if event.seq_num <= event.parent_seq_num {
            return Err(format!(
                "Invalid event number e{}: must be greater than its parent e{}",
                event.seq_num, event.parent_seq_num
            ));
        }
        if i > 0 && event.parent_seq_num != batch[i - 1].seq_num {
            return Err(format!(
                "Invalid batch: e{} has parent e{} but follows e{}",
                event.seq_num,
                event.parent_seq_num,
                batch[i - 1].seq_num
            ));
        }
    }
    Ok(())
}
