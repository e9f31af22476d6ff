//! StrataDB: a semi-structured, key-ordered database engine layered on an
//! ordered key/value store.
//!
//! Keyspaces are logical databases carrying a dense integer id; tables
//! are byte-string namespaces inside a keyspace; rows hold multiple
//! timestamped columns under an arbitrary byte-string key. Every logical
//! datum maps onto one entry of the backing store through an
//! order-preserving composite key encoding, so range queries become
//! ordered scans.
//!
//! ```
//! use stratadb::{Column, ColumnRange, KeyRange, StrataConfig, StrataDb};
//!
//! let db = StrataDb::in_memory(StrataConfig::default()).unwrap();
//! let users = db.register_keyspace("users").unwrap();
//! users
//!     .read_committed_transaction(|tx| {
//!         tx.put_columns(
//!             b"t",
//!             b"alice",
//!             vec![Column::new(b"name".to_vec(), b"A".to_vec())],
//!         )
//!     })
//!     .unwrap();
//! let (_, slices) = users
//!     .get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)
//!     .unwrap();
//! assert_eq!(slices[0].key, b"alice");
//! ```

pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod query;
pub mod replication;
pub mod storage;
pub mod txn;

pub use config::StrataConfig;
pub use error::{StrataError, StrataErrorCode};
pub use query::{ColumnRange, KeyRange, KeySlice, Slice, TableStats};
pub use storage::memory::MemoryStore;
pub use txn::{Column, IsolationLevel, Timestamp, Transaction};

use crate::backup::DumpChunk;
use crate::notify::{NotificationStream, NotifyHub};
use crate::replication::{encode_update, UpdateHub, UpdateStream};
use crate::storage::datum_key::{
    keyspace_meta_key, keyspace_meta_prefix, FIRST_KEYSPACE_ID, SENTINEL_KEYSPACE_ID,
};
use crate::storage::store::{Store, WriteBatch};
use crate::txn::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

struct DbShared {
    config: StrataConfig,
    store: Arc<dyn Store>,
    /// Read-mostly name → id map; write-locked only by registration.
    keyspaces: RwLock<HashMap<String, u32>>,
    /// Serializes commits so exactly one batch lands at a time.
    commit_lock: Mutex<()>,
    updates: UpdateHub,
    notifications: NotifyHub,
}

/// Engine instance over one backing store.
pub struct StrataDb {
    shared: Arc<DbShared>,
}

impl StrataDb {
    /// Opens the engine over an existing store, loading the persisted
    /// keyspace registry.
    pub fn open(config: StrataConfig, store: Arc<dyn Store>) -> Result<Self, StrataError> {
        let mut keyspaces = HashMap::new();
        store.iter_from(&keyspace_meta_prefix(), &mut |key, value| {
            let name = std::str::from_utf8(&key[1..]).ok();
            let id = <[u8; 4]>::try_from(value).ok().map(u32::from_be_bytes);
            match (name, id) {
                (Some(name), Some(id)) => {
                    keyspaces.insert(name.to_string(), id);
                }
                _ => {
                    warn!(
                        key = ?String::from_utf8_lossy(key),
                        "skipping malformed keyspace metadata entry"
                    );
                }
            }
            true
        })?;
        info!(keyspaces = keyspaces.len(), "strata instance opened");
        Ok(Self {
            shared: Arc::new(DbShared {
                config,
                store,
                keyspaces: RwLock::new(keyspaces),
                commit_lock: Mutex::new(()),
                updates: UpdateHub::new(),
                notifications: NotifyHub::new(),
            }),
        })
    }

    /// Opens the engine over a fresh in-memory store.
    pub fn in_memory(config: StrataConfig) -> Result<Self, StrataError> {
        Self::open(config, MemoryStore::open())
    }

    /// Registers a keyspace, assigning the next dense id and persisting
    /// the mapping durably. Registering an existing name returns the
    /// existing keyspace.
    pub fn register_keyspace(&self, name: &str) -> Result<KeyspaceHandle, StrataError> {
        if let Some(id) = self.shared.keyspaces.read().get(name) {
            return Ok(self.handle(name, *id));
        }
        let mut map = self.shared.keyspaces.write();
        if let Some(id) = map.get(name) {
            return Ok(self.handle(name, *id));
        }
        let id = map
            .values()
            .max()
            .map(|max| max + 1)
            .unwrap_or(FIRST_KEYSPACE_ID);
        if id == SENTINEL_KEYSPACE_ID {
            return Err(StrataError::UnsatisfiedConstraint(
                "keyspace id space exhausted".into(),
            ));
        }
        let mut batch = WriteBatch::new();
        batch.put(keyspace_meta_key(name), id.to_be_bytes().to_vec());
        self.shared.store.write_batch(batch, true)?;
        map.insert(name.to_string(), id);
        info!(keyspace = name, id, "keyspace registered");
        Ok(self.handle(name, id))
    }

    pub fn get_keyspace(&self, name: &str) -> Result<KeyspaceHandle, StrataError> {
        self.shared
            .keyspaces
            .read()
            .get(name)
            .map(|id| self.handle(name, *id))
            .ok_or_else(|| StrataError::UnknownKeyspace(name.to_string()))
    }

    /// Registered keyspaces in ascending name order.
    pub fn list_keyspaces(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> = self
            .shared
            .keyspaces
            .read()
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        entries.sort();
        entries
    }

    /// Opens a replication stream over every subsequent commit.
    pub fn subscribe_updates(&self) -> UpdateStream {
        self.shared
            .updates
            .subscribe(self.shared.config.replication_queue_depth)
    }

    fn handle(&self, name: &str, id: u32) -> KeyspaceHandle {
        KeyspaceHandle {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            id,
        }
    }
}

/// Client-facing handle to one keyspace. Cheap to clone; all handles
/// share the engine state.
#[derive(Clone)]
pub struct KeyspaceHandle {
    shared: Arc<DbShared>,
    name: String,
    id: u32,
}

impl std::fmt::Debug for KeyspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyspaceHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl KeyspaceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    pub(crate) fn config(&self) -> &StrataConfig {
        &self.shared.config
    }

    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.shared.commit_lock.lock()
    }

    pub(crate) fn publish_update(&self, batch: WriteBatch) {
        self.shared.updates.publish(encode_update(self.id, &batch));
    }

    pub(crate) fn dispatch_notification(&self, topic: &str) {
        self.shared.notifications.dispatch(self.id, topic);
    }

    /// Subscribes to a notification topic on this keyspace.
    pub fn listen(&self, topic: &str) -> NotificationStream {
        self.shared.notifications.listen(self.id, topic)
    }

    /// Runs `f` in a read-committed transaction: reads observe writes
    /// committed by others as they land.
    pub fn read_committed_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StrataError>,
    ) -> Result<T, StrataError> {
        self.run_transaction(IsolationLevel::ReadCommitted, false, f)
    }

    /// Runs `f` in a repeatable-read transaction over a snapshot taken
    /// at begin.
    pub fn repeatable_read_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StrataError>,
    ) -> Result<T, StrataError> {
        self.run_transaction(IsolationLevel::RepeatableRead, false, f)
    }

    /// Snapshot transaction that rejects writes with
    /// `ReadOnlyViolation`.
    pub fn read_only_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StrataError>,
    ) -> Result<T, StrataError> {
        self.run_transaction(IsolationLevel::RepeatableRead, true, f)
    }

    fn run_transaction<T>(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StrataError>,
    ) -> Result<T, StrataError> {
        let mut tx = Transaction::begin(self, isolation, read_only);
        match f(&mut tx) {
            Ok(value) => match tx.commit() {
                Ok(()) => Ok(value),
                Err(e) => Err(e.into_abort()),
            },
            Err(e) => {
                tx.abort();
                if e.aborts_transaction() {
                    Err(e.into_abort())
                } else {
                    Err(e)
                }
            }
        }
    }

    // ----- single-operation conveniences, each its own transaction -----

    pub fn put_columns(
        &self,
        table: &[u8],
        key: &[u8],
        columns: Vec<Column>,
    ) -> Result<(), StrataError> {
        self.read_committed_transaction(|tx| tx.put_columns(table, key, columns))
    }

    pub fn delete_columns(
        &self,
        table: &[u8],
        key: &[u8],
        columns: &[Bytes],
    ) -> Result<(), StrataError> {
        self.read_committed_transaction(|tx| tx.delete_columns(table, key, columns))
    }

    pub fn delete_key(&self, table: &[u8], key: &[u8]) -> Result<(), StrataError> {
        self.read_committed_transaction(|tx| tx.delete_key(table, key))
    }

    pub fn get_slice(
        &self,
        table: &[u8],
        key_range: KeyRange,
        column_range: ColumnRange,
        max_keys: usize,
        max_columns: usize,
    ) -> Result<Slice, StrataError> {
        self.read_committed_transaction(|tx| {
            tx.get_slice(table, key_range, column_range, max_keys, max_columns)
        })
    }

    pub fn get_slice_values(
        &self,
        table: &[u8],
        key_range: KeyRange,
        columns: Vec<Bytes>,
        max_keys: usize,
    ) -> Result<(Option<Bytes>, Vec<(Bytes, Vec<Option<Bytes>>)>), StrataError> {
        self.read_committed_transaction(|tx| {
            tx.get_slice_values(table, key_range, columns, max_keys)
        })
    }

    pub fn get_column(
        &self,
        table: &[u8],
        key: &[u8],
        column: &[u8],
    ) -> Result<Option<Column>, StrataError> {
        self.read_committed_transaction(|tx| tx.get_column(table, key, column))
    }

    pub fn get_column_values(
        &self,
        table: &[u8],
        key: &[u8],
        columns: &[Bytes],
    ) -> Result<Vec<Option<Bytes>>, StrataError> {
        self.read_committed_transaction(|tx| tx.get_column_values(table, key, columns))
    }

    pub fn exists_key(&self, table: &[u8], key: &[u8]) -> Result<bool, StrataError> {
        self.read_committed_transaction(|tx| tx.exists_key(table, key))
    }

    pub fn count_keys(&self, table: &[u8], key_range: KeyRange) -> Result<u64, StrataError> {
        self.read_committed_transaction(|tx| tx.count_keys(table, key_range))
    }

    pub fn list_tables(&self) -> Result<Vec<Bytes>, StrataError> {
        self.read_committed_transaction(|tx| tx.list_tables())
    }

    pub fn table_stats(&self, table: &[u8]) -> Result<TableStats, StrataError> {
        self.read_committed_transaction(|tx| tx.table_stats(table))
    }

    /// Produces one dump chunk. Each call snapshots independently; run a
    /// single `read_only_transaction` with `backup::dump_chunk` for a
    /// fully consistent multi-chunk dump.
    pub fn dump_chunk(&self, cursor: Option<&str>) -> Result<DumpChunk, StrataError> {
        self.read_only_transaction(|tx| backup::dump_chunk(tx, cursor))
    }

    /// Loads one dump chunk and commits it.
    pub fn load_chunk(&self, data: &[u8]) -> Result<u64, StrataError> {
        self.read_committed_transaction(|tx| backup::load_chunk(tx, data))
    }
}
