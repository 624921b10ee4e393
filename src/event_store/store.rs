//! Event Log Store - durable per-store event tables
//!
//! Every store gets its own append-only table in a SQLite database. All
//! SQLite work runs on the blocking thread pool; callers only see async
//! methods and a single [`EventStoreError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use thiserror::Error;
use tracing::debug;

use super::naming::{
    create_table_statement, event_log_table_name, insert_chunk_size, insert_statement,
    quote_identifier, COLUMNS_PER_EVENT,
};
use crate::types::{EventEncoded, EventMetadata, EventWithMetadata};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for EventLogStore operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Storage could not be opened
    #[error("failed to open storage at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Any failure while reading or writing a store's data
    #[error("unexpected storage error for store {store_id}: {source}")]
    Unexpected {
        store_id: String,
        #[source]
        source: BoxError,
    },
}

impl EventStoreError {
    pub(crate) fn unexpected(store_id: &str, source: impl Into<BoxError>) -> Self {
        EventStoreError::Unexpected {
            store_id: store_id.to_string(),
            source: source.into(),
        }
    }
}

/// Open a SQLite connection, or an in-memory database when `path` is `None`
pub(super) fn open_connection(path: Option<&Path>) -> EventStoreResult<Connection> {
    let Some(path) = path else {
        return Connection::open_in_memory().map_err(|e| EventStoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e.into(),
        });
    };

    let open = || -> Result<Connection, BoxError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    };

    open().map_err(|source| EventStoreError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Run a closure against a shared connection on the blocking pool
pub(super) async fn run_blocking<T, F>(
    conn: &Arc<Mutex<Connection>>,
    store_id: &str,
    f: F,
) -> EventStoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, BoxError> + Send + 'static,
{
    let conn = Arc::clone(conn);
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock();
        f(&mut guard)
    })
    .await;

    match joined {
        Ok(result) => result.map_err(|e| EventStoreError::unexpected(store_id, e)),
        Err(e) => Err(EventStoreError::unexpected(store_id, e)),
    }
}

/// Durable, append-only event tables, one per store
pub struct EventLogStore {
    conn: Arc<Mutex<Connection>>,
    insert_chunk_size: usize,
}

impl EventLogStore {
    /// Open (or create) the event log database at `path`
    pub fn open<P: AsRef<Path>>(path: P, sql_max_parameters: usize) -> EventStoreResult<Self> {
        let conn = open_connection(Some(path.as_ref()))?;
        Ok(Self::from_connection(conn, sql_max_parameters))
    }

    /// Create an event log backed by an in-memory database
    pub fn open_in_memory(sql_max_parameters: usize) -> EventStoreResult<Self> {
        let conn = open_connection(None)?;
        Ok(Self::from_connection(conn, sql_max_parameters))
    }

    fn from_connection(conn: Connection, sql_max_parameters: usize) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            insert_chunk_size: insert_chunk_size(sql_max_parameters),
        }
    }

    /// Events written per insert statement
    pub fn insert_chunk_size(&self) -> usize {
        self.insert_chunk_size
    }

    /// Run raw SQL against the backing connection
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.conn.lock().execute_batch(sql).unwrap();
    }

    /// Load all events with `seqNum > cursor` in ascending order
    ///
    /// With no cursor every event is returned. A cursor that matches no
    /// stored event is not an error; it simply filters by value.
    pub async fn get_events(
        &self,
        store_id: &str,
        cursor: Option<i64>,
    ) -> EventStoreResult<Vec<EventWithMetadata>> {
        let table = event_log_table_name(store_id);

        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute_batch(&create_table_statement(&table))?;

            let sql = format!(
                "SELECT seqNum, parentSeqNum, name, args, createdAt, clientId, sessionId
                 FROM {}
                 WHERE ?1 IS NULL OR seqNum > ?1
                 ORDER BY seqNum ASC",
                quote_identifier(&table)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([cursor], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (seq_num, parent_seq_num, name, args, created_at, client_id, session_id) =
                    row?;
                let args = match args {
                    Some(text) => Some(serde_json::from_str(&text)?),
                    None => None,
                };
                events.push(EventWithMetadata {
                    event: EventEncoded {
                        seq_num,
                        parent_seq_num,
                        name,
                        args,
                        client_id,
                        session_id,
                    },
                    metadata: Some(EventMetadata { created_at }),
                });
            }
            Ok(events)
        })
        .await
    }

    /// Durably append a batch, split into parameter-safe insert statements
    ///
    /// All chunks of the batch are written in one transaction.
    pub async fn append_events(
        &self,
        store_id: &str,
        batch: Vec<EventEncoded>,
        created_at: String,
    ) -> EventStoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let table = event_log_table_name(store_id);
        let chunk_size = self.insert_chunk_size;
        let log_store_id = store_id.to_string();

        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute_batch(&create_table_statement(&table))?;

            let tx = conn.transaction()?;
            let mut chunks = 0usize;
            for chunk in batch.chunks(chunk_size) {
                let mut values = Vec::with_capacity(chunk.len() * COLUMNS_PER_EVENT);
                for event in chunk {
                    values.push(SqlValue::Integer(event.seq_num));
                    values.push(SqlValue::Integer(event.parent_seq_num));
                    values.push(SqlValue::Text(event.name.clone()));
                    values.push(match &event.args {
                        Some(args) => SqlValue::Text(serde_json::to_string(args)?),
                        None => SqlValue::Null,
                    });
                    values.push(SqlValue::Text(created_at.clone()));
                    values.push(SqlValue::Text(event.client_id.clone()));
                    values.push(SqlValue::Text(event.session_id.clone()));
                }
                tx.execute(
                    &insert_statement(&table, chunk.len()),
                    params_from_iter(values.iter()),
                )?;
                chunks += 1;
            }
            tx.commit()?;

            debug!(
                store_id = %log_store_id,
                events = batch.len(),
                chunks,
                "Appended events to durable log"
            );
            Ok(())
        })
        .await
    }

    /// Highest committed `seqNum` in the durable log, if any
    pub async fn head(&self, store_id: &str) -> EventStoreResult<Option<i64>> {
        let table = event_log_table_name(store_id);

        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute_batch(&create_table_statement(&table))?;
            let head = conn.query_row(
                &format!("SELECT MAX(seqNum) FROM {}", quote_identifier(&table)),
                [],
                |row| row.get::<_, Option<i64>>(0),
            )?;
            Ok(head)
        })
        .await
    }

    /// Delete every durable event of a store
    pub async fn purge(&self, store_id: &str) -> EventStoreResult<()> {
        let table = event_log_table_name(store_id);

        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(&table)))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_batch(parent: i64, count: usize) -> Vec<EventEncoded> {
        (0..count as i64)
            .map(|i| EventEncoded {
                seq_num: parent + i + 1,
                parent_seq_num: parent + i,
                name: "cellUpdated".to_string(),
                args: if i % 2 == 0 { Some(json!({ "index": i })) } else { None },
                client_id: "client-1".to_string(),
                session_id: "session-1".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        let batch = make_batch(0, 3);

        store
            .append_events("room", batch.clone(), "2024-05-01T10:00:00+00:00".to_string())
            .await
            .unwrap();

        let events = store.get_events("room", None).await.unwrap();
        assert_eq!(events.len(), 3);
        for (stored, original) in events.iter().zip(batch.iter()) {
            assert_eq!(&stored.event, original);
            assert_eq!(
                stored.metadata.as_ref().unwrap().created_at,
                "2024-05-01T10:00:00+00:00"
            );
        }
    }

    #[tokio::test]
    async fn test_null_args_survive_storage() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        let mut batch = make_batch(0, 2);
        batch[0].args = Some(serde_json::Value::Null);
        batch[1].args = None;

        store
            .append_events("room", batch.clone(), "t".to_string())
            .await
            .unwrap();

        let events = store.get_events("room", None).await.unwrap();
        assert_eq!(events[0].event.args, Some(serde_json::Value::Null));
        assert_eq!(events[1].event.args, None);
    }

    #[tokio::test]
    async fn test_cursor_filters_and_orders() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        store
            .append_events("room", make_batch(0, 5), "t".to_string())
            .await
            .unwrap();

        let after_two = store.get_events("room", Some(2)).await.unwrap();
        let seqs: Vec<i64> = after_two.iter().map(|e| e.event.seq_num).collect();
        assert_eq!(seqs, vec![3, 4, 5]);

        // Cursors that match no stored event are tolerated
        assert_eq!(store.get_events("room", Some(-10)).await.unwrap().len(), 5);
        assert!(store.get_events("room", Some(99)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_batch_is_chunked() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        assert_eq!(store.insert_chunk_size(), 14);

        store
            .append_events("big", make_batch(0, 100), "t".to_string())
            .await
            .unwrap();

        let events = store.get_events("big", None).await.unwrap();
        assert_eq!(events.len(), 100);
        assert!(events
            .windows(2)
            .all(|w| w[0].event.seq_num < w[1].event.seq_num));
        assert_eq!(store.head("big").await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_stores_are_isolated() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        store
            .append_events("a", make_batch(0, 2), "t".to_string())
            .await
            .unwrap();

        assert!(store.get_events("b", None).await.unwrap().is_empty());
        assert_eq!(store.head("b").await.unwrap(), None);
        assert_eq!(store.head("a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_hostile_store_id_is_harmless() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        let hostile = "x\"; DROP TABLE sqlite_master; --";

        store
            .append_events(hostile, make_batch(0, 1), "t".to_string())
            .await
            .unwrap();
        assert_eq!(store.get_events(hostile, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_seq_num_rejected_atomically() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        store
            .append_events("room", make_batch(0, 2), "t".to_string())
            .await
            .unwrap();

        // Second batch overlaps on seqNum 2; nothing of it may land
        let mut overlapping = make_batch(2, 1);
        overlapping.extend(make_batch(1, 1));
        let err = store
            .append_events("room", overlapping, "t".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Unexpected { ref store_id, .. } if store_id == "room"));
        assert_eq!(store.head("room").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_backend_failure_is_wrapped() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        store.get_events("room", None).await.unwrap();
        store.execute_raw("PRAGMA query_only = ON");

        let err = store
            .append_events("room", make_batch(0, 1), "t".to_string())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected storage error for store room"));
    }

    #[tokio::test]
    async fn test_purge_removes_rows() {
        let store = EventLogStore::open_in_memory(100).unwrap();
        store
            .append_events("room", make_batch(0, 4), "t".to_string())
            .await
            .unwrap();

        store.purge("room").await.unwrap();
        assert!(store.get_events("room", None).await.unwrap().is_empty());
        assert_eq!(store.head("room").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eventlog.db");

        {
            let store = EventLogStore::open(&path, 100).unwrap();
            store
                .append_events("room", make_batch(0, 3), "t".to_string())
                .await
                .unwrap();
        }

        let reopened = EventLogStore::open(&path, 100).unwrap();
        assert_eq!(reopened.head("room").await.unwrap(), Some(3));
    }
}
