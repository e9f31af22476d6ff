//! Reference backend over an immutable ordered map.
//!
//! Snapshots are O(1): an `im::OrdMap` clone shares structure with the
//! live map and detaches lazily as later writes land.

use crate::error::StrataError;
use crate::storage::store::{BatchOp, Store, StoreIterator, StoreRead, WriteBatch};
use im::OrdMap;
use parking_lot::RwLock;
use std::ops::Bound;
use std::sync::Arc;

type Map = OrdMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Map>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open() -> Arc<dyn Store> {
        Arc::new(Self::new())
    }

    fn current(&self) -> Map {
        self.inner.read().clone()
    }
}

impl StoreRead for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StrataError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn iterator(&self) -> Box<dyn StoreIterator> {
        Box::new(MemoryIterator::new(self.current()))
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StrataError> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StrataError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch, _sync: bool) -> Result<(), StrataError> {
        let mut map = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Arc<dyn StoreRead> {
        Arc::new(MemorySnapshot {
            map: self.current(),
        })
    }

    fn approximate_size(&self, first: &[u8], up_to: &[u8]) -> Result<u64, StrataError> {
        let map = self.inner.read();
        let mut total = 0u64;
        for (key, value) in map.range((
            Bound::Included(first.to_vec()),
            Bound::Excluded(up_to.to_vec()),
        )) {
            total += (key.len() + value.len()) as u64;
        }
        Ok(total)
    }

    fn mem(&self, key: &[u8]) -> Result<bool, StrataError> {
        Ok(self.inner.read().contains_key(key))
    }

    fn iter_from(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StrataError> {
        let map = self.current();
        for (key, value) in map.range((Bound::Included(prefix.to_vec()), Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }
}

struct MemorySnapshot {
    map: Map,
}

impl StoreRead for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StrataError> {
        Ok(self.map.get(key).cloned())
    }

    fn iterator(&self) -> Box<dyn StoreIterator> {
        Box::new(MemoryIterator::new(self.map.clone()))
    }
}

/// Owned cursor: holds its own map version, so it stays valid however
/// long the caller keeps it.
struct MemoryIterator {
    map: Map,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemoryIterator {
    fn new(map: Map) -> Self {
        Self { map, current: None }
    }

    fn first_at_or_after(&self, bound: Bound<Vec<u8>>) -> Option<(Vec<u8>, Vec<u8>)> {
        self.map
            .range((bound, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

impl StoreIterator for MemoryIterator {
    fn seek(&mut self, key: &[u8]) {
        self.current = self.first_at_or_after(Bound::Included(key.to_vec()));
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.current = self.first_at_or_after(Bound::Excluded(key));
        }
    }

    fn key(&self) -> &[u8] {
        self.current
            .as_ref()
            .map(|(k, _)| k.as_slice())
            .unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current
            .as_ref()
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }
}
