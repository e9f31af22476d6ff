//! Transaction engine: per-transaction overlays shadowing the backing
//! store, read-committed and repeatable-read isolation, nested
//! transactions sharing the outer overlays, and the commit path that
//! flushes everything through one atomic write batch.

mod pool;

pub(crate) use pool::IteratorPool;

use crate::error::StrataError;
use crate::storage::datum_key::{column_prefix, encode_datum_key, DatumKeyBuf};
use crate::storage::store::{StoreIterator, WriteBatch};
use crate::KeyspaceHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub type Bytes = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IsolationLevel {
    /// Reads go to the live store; successive reads may observe writes
    /// committed by others mid-transaction.
    ReadCommitted,
    /// Reads go through a snapshot taken at `begin`.
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Timestamp {
    /// Resolved to the commit time.
    Auto,
    /// Microseconds since the Unix epoch.
    At(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub name: Bytes,
    pub value: Bytes,
    pub timestamp: Timestamp,
}

impl Column {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp: Timestamp::Auto,
        }
    }

    pub fn with_timestamp(name: impl Into<Bytes>, value: impl Into<Bytes>, micros: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp: Timestamp::At(micros),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnWrite {
    pub value: Bytes,
    pub timestamp: Timestamp,
}

/// The five per-transaction overlays. Invariant: a column present in
/// `added` for a key is never simultaneously present in `deleted`, and a
/// key in `added_keys` has a non-empty `added` entry.
#[derive(Debug, Default)]
pub(crate) struct Overlays {
    pub added_keys: BTreeMap<Bytes, BTreeSet<Bytes>>,
    pub deleted_keys: BTreeMap<Bytes, BTreeSet<Bytes>>,
    pub added: BTreeMap<Bytes, BTreeMap<Bytes, BTreeMap<Bytes, ColumnWrite>>>,
    pub deleted: BTreeMap<Bytes, BTreeMap<Bytes, BTreeSet<Bytes>>>,
    pub batch: WriteBatch,
}

impl Overlays {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.batch.is_empty()
    }
}

pub(crate) enum TxView {
    Live,
    /// The snapshot itself lives inside the pool; every pooled iterator
    /// reads the same point-in-time view.
    Snapshot { pool: IteratorPool },
}

pub struct Transaction<'a> {
    pub(crate) ks: &'a KeyspaceHandle,
    isolation: IsolationLevel,
    read_only: bool,
    depth: u32,
    pub(crate) view: TxView,
    pub(crate) overlays: Overlays,
    notifications: Vec<String>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(ks: &'a KeyspaceHandle, isolation: IsolationLevel, read_only: bool) -> Self {
        let view = match isolation {
            IsolationLevel::ReadCommitted => TxView::Live,
            IsolationLevel::RepeatableRead => {
                let view = ks.store().snapshot();
                let pool = IteratorPool::new(view, ks.config().iterator_pool_size);
                TxView::Snapshot { pool }
            }
        };
        Self {
            ks,
            isolation,
            read_only,
            depth: 0,
            view,
            overlays: Overlays::default(),
            notifications: Vec::new(),
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn keyspace_id(&self) -> u32 {
        self.ks.id()
    }

    /// Runs `f` as a nested transaction. The child shares these overlays;
    /// its writes become visible to the parent immediately and are
    /// committed only when the outermost transaction completes. An error
    /// propagates and aborts the whole chain.
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'a>) -> Result<T, StrataError>,
    ) -> Result<T, StrataError> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Queues a notification topic delivered after the outermost commit
    /// succeeds; dropped on abort.
    pub fn notify(&mut self, topic: impl Into<String>) {
        self.notifications.push(topic.into());
    }

    // ----- reads used by the query layer -----

    /// Hands a seekable iterator over the transaction's read view to `f`.
    /// Read-committed acquires a fresh live iterator per call;
    /// repeatable-read borrows from the bounded snapshot pool and blocks
    /// while the pool is exhausted.
    pub(crate) fn with_iterator<R>(
        &self,
        f: impl FnOnce(&mut dyn StoreIterator) -> Result<R, StrataError>,
    ) -> Result<R, StrataError> {
        match &self.view {
            TxView::Live => {
                let mut iter = self.ks.store().iterator();
                f(iter.as_mut())
            }
            TxView::Snapshot { pool } => {
                let mut iter = pool.acquire();
                f(iter.as_mut())
            }
        }
    }

    pub(crate) fn is_key_deleted(&self, table: &[u8], key: &[u8]) -> bool {
        self.overlays
            .deleted_keys
            .get(table)
            .is_some_and(|keys| keys.contains(key))
    }

    pub(crate) fn is_column_deleted(&self, table: &[u8], key: &[u8], column: &[u8]) -> bool {
        self.overlays
            .deleted
            .get(table)
            .and_then(|keys| keys.get(key))
            .is_some_and(|cols| cols.contains(column))
    }

    pub(crate) fn added_columns(
        &self,
        table: &[u8],
        key: &[u8],
    ) -> Option<&BTreeMap<Bytes, ColumnWrite>> {
        self.overlays.added.get(table).and_then(|keys| keys.get(key))
    }

    // ----- row-level writes -----

    pub fn put_columns(
        &mut self,
        table: &[u8],
        key: &[u8],
        columns: Vec<Column>,
    ) -> Result<(), StrataError> {
        self.check_writable()?;
        if columns.is_empty() {
            return Ok(());
        }
        self.overlays
            .added_keys
            .entry(table.to_vec())
            .or_default()
            .insert(key.to_vec());
        if let Some(keys) = self.overlays.deleted_keys.get_mut(table) {
            keys.remove(key);
        }
        if let Some(cols) = self
            .overlays
            .deleted
            .get_mut(table)
            .and_then(|keys| keys.get_mut(key))
        {
            for column in &columns {
                cols.remove(&column.name);
            }
        }
        let slot = self
            .overlays
            .added
            .entry(table.to_vec())
            .or_default()
            .entry(key.to_vec())
            .or_default();
        for column in columns {
            slot.insert(
                column.name,
                ColumnWrite {
                    value: column.value,
                    timestamp: column.timestamp,
                },
            );
        }
        Ok(())
    }

    pub fn delete_columns(
        &mut self,
        table: &[u8],
        key: &[u8],
        columns: &[Bytes],
    ) -> Result<(), StrataError> {
        self.check_writable()?;
        if columns.is_empty() {
            return Ok(());
        }
        if let Some(keys) = self.overlays.added.get_mut(table) {
            if let Some(cols) = keys.get_mut(key) {
                for column in columns {
                    cols.remove(column);
                }
                if cols.is_empty() {
                    keys.remove(key);
                    if let Some(added) = self.overlays.added_keys.get_mut(table) {
                        added.remove(key);
                    }
                }
            }
        }
        let slot = self
            .overlays
            .deleted
            .entry(table.to_vec())
            .or_default()
            .entry(key.to_vec())
            .or_default();
        for column in columns {
            slot.insert(column.clone());
        }
        Ok(())
    }

    /// Deletes every live column of the key and tombstones the key itself.
    pub fn delete_key(&mut self, table: &[u8], key: &[u8]) -> Result<(), StrataError> {
        self.check_writable()?;
        let live: Vec<Bytes> = self
            .get_columns(table, key, usize::MAX, crate::query::ColumnRange::All)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        self.delete_columns(table, key, &live)?;
        self.overlays
            .deleted_keys
            .entry(table.to_vec())
            .or_default()
            .insert(key.to_vec());
        Ok(())
    }

    /// Stages a raw datum directly into the commit batch, bypassing the
    /// overlays. Used by restore so embedded timestamps survive verbatim.
    pub(crate) fn stage_raw_datum(
        &mut self,
        table: &[u8],
        key: &[u8],
        column: &[u8],
        timestamp_micros: i64,
        value: &[u8],
    ) -> Result<(), StrataError> {
        self.check_writable()?;
        let mut datum = DatumKeyBuf::new();
        encode_datum_key(&mut datum, self.ks.id(), table, key, column, timestamp_micros)?;
        self.overlays.batch.put(datum.to_vec(), value.to_vec());
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StrataError> {
        if self.read_only {
            return Err(StrataError::ReadOnlyViolation(format!(
                "keyspace '{}' opened a read-only transaction",
                self.ks.name()
            )));
        }
        Ok(())
    }

    // ----- commit / abort -----

    /// Flushes the overlays through one atomic batch. Only the outermost
    /// transaction runner calls this.
    pub(crate) fn commit(mut self) -> Result<(), StrataError> {
        debug_assert_eq!(self.depth, 0, "commit from a nested transaction");
        if self.overlays.is_empty() {
            self.dispatch_notifications();
            return Ok(());
        }
        let commit_ts = now_micros();
        let mut batch = WriteBatch::new();

        // Tombstones first: every stored version of each deleted column
        // visible to this transaction is physically removed.
        for (table, keys) in &self.overlays.deleted {
            for (key, cols) in keys {
                for col in cols {
                    self.append_version_deletes(&mut batch, table, key, col)?;
                }
            }
        }

        for (table, keys) in &self.overlays.added {
            for (key, cols) in keys {
                for (name, write) in cols {
                    let ts = match write.timestamp {
                        Timestamp::Auto => commit_ts,
                        Timestamp::At(micros) => micros,
                    };
                    let mut datum = DatumKeyBuf::new();
                    encode_datum_key(&mut datum, self.ks.id(), table, key, name, ts)?;
                    batch.put(datum.to_vec(), write.value.clone());
                }
            }
        }

        batch.append(std::mem::take(&mut self.overlays.batch));

        let op_count = batch.len();
        {
            let _commit_guard = self.ks.commit_lock();
            self.ks
                .store()
                .write_batch(batch.clone(), self.ks.config().sync_commits)?;
        }
        debug!(
            keyspace = self.ks.name(),
            ops = op_count,
            commit_ts_micros = commit_ts,
            "transaction committed"
        );
        self.ks.publish_update(batch);
        self.dispatch_notifications();
        Ok(())
    }

    pub(crate) fn abort(self) {
        debug!(keyspace = self.ks.name(), "transaction aborted");
        // Overlays, notifications and any snapshot drop here.
    }

    fn append_version_deletes(
        &self,
        batch: &mut WriteBatch,
        table: &[u8],
        key: &[u8],
        column: &[u8],
    ) -> Result<(), StrataError> {
        let mut prefix = DatumKeyBuf::new();
        column_prefix(&mut prefix, self.ks.id(), table, key, column);
        self.with_iterator(|iter| {
            iter.seek(&prefix);
            while iter.valid() && iter.key().starts_with(&prefix) {
                batch.delete(iter.key().to_vec());
                iter.next();
            }
            Ok(())
        })
    }

    fn dispatch_notifications(&mut self) {
        for topic in std::mem::take(&mut self.notifications) {
            self.ks.dispatch_notification(&topic);
        }
    }
}

pub(crate) fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
