//! Contract consumed from the backing ordered key/value store.
//!
//! The engine assumes a byte-lexicographic keyspace with point gets,
//! seekable iteration, atomic write batches and point-in-time snapshots.
//! Everything is synchronous; blocking inside a store call is acceptable.

use crate::error::StrataError;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of operations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn append(&mut self, mut other: WriteBatch) {
        self.ops.append(&mut other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<T: IntoIterator<Item = BatchOp>>(iter: T) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Seekable cursor over the store's ordered keyspace. Freshly created
/// iterators are not positioned; `seek` places the cursor at the first
/// entry at or after the given key.
pub trait StoreIterator: Send {
    fn seek(&mut self, key: &[u8]);
    fn valid(&self) -> bool;
    fn next(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// Read surface shared by the live store and point-in-time snapshots.
pub trait StoreRead: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StrataError>;
    fn iterator(&self) -> Box<dyn StoreIterator>;
}

pub trait Store: StoreRead {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StrataError>;
    fn delete(&self, key: &[u8]) -> Result<(), StrataError>;
    /// Applies every op atomically. `sync` requests durability before
    /// returning; backends without a durability notion may ignore it.
    fn write_batch(&self, batch: WriteBatch, sync: bool) -> Result<(), StrataError>;
    /// Point-in-time read view unaffected by later writes.
    fn snapshot(&self) -> Arc<dyn StoreRead>;
    /// Size estimate for the half-open range `[first, up_to)`.
    fn approximate_size(&self, first: &[u8], up_to: &[u8]) -> Result<u64, StrataError>;
    /// Membership probe without materialising the value.
    fn mem(&self, key: &[u8]) -> Result<bool, StrataError>;
    /// Visits entries with the given prefix in order until the callback
    /// returns `false`.
    fn iter_from(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StrataError>;
}
