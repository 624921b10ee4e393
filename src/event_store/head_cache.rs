//! Local head cache
//!
//! Keeps the last committed `seqNum` of each store in a small local
//! database so a reconstructed session can validate pushes without
//! scanning the event log. The cache is advisory: when it has no entry the
//! session falls back to the durable log.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{open_connection, run_blocking, EventStoreError, EventStoreResult};

const CREATE_HEADS_TABLE: &str = "CREATE TABLE IF NOT EXISTS store_heads (
    storeId TEXT PRIMARY KEY,
    head INTEGER NOT NULL
)";

/// Fast per-store head storage
pub struct HeadCache {
    conn: Arc<Mutex<Connection>>,
}

impl HeadCache {
    /// Open (or create) the local state database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> EventStoreResult<Self> {
        Self::init(open_connection(Some(path.as_ref()))?, path.as_ref())
    }

    /// Create a head cache backed by an in-memory database
    pub fn open_in_memory() -> EventStoreResult<Self> {
        Self::init(open_connection(None)?, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> EventStoreResult<Self> {
        conn.execute_batch(CREATE_HEADS_TABLE)
            .map_err(|e| EventStoreError::Open {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Cached head of a store
    pub async fn get(&self, store_id: &str) -> EventStoreResult<Option<i64>> {
        let key = store_id.to_string();
        run_blocking(&self.conn, store_id, move |conn| {
            let head = conn
                .query_row(
                    "SELECT head FROM store_heads WHERE storeId = ?1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(head)
        })
        .await
    }

    /// Record a new head for a store
    pub async fn put(&self, store_id: &str, head: i64) -> EventStoreResult<()> {
        let key = store_id.to_string();
        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute(
                "INSERT INTO store_heads (storeId, head) VALUES (?1, ?2)
                 ON CONFLICT(storeId) DO UPDATE SET head = excluded.head",
                params![key, head],
            )?;
            Ok(())
        })
        .await
    }

    /// Forget the cached head of a store
    pub async fn clear(&self, store_id: &str) -> EventStoreResult<()> {
        let key = store_id.to_string();
        run_blocking(&self.conn, store_id, move |conn| {
            conn.execute("DELETE FROM store_heads WHERE storeId = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    /// Run raw SQL against the backing connection
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.conn.lock().execute_batch(sql).unwrap();
    }
}
