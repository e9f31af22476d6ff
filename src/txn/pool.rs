//! Bounded pool of snapshot iterators for repeatable-read transactions.
//! Acquire blocks while every slot is handed out; drop returns the
//! iterator for reuse instead of reopening one per scan.

use crate::storage::store::{StoreIterator, StoreRead};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

pub(crate) struct IteratorPool {
    view: Arc<dyn StoreRead>,
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
}

struct PoolState {
    idle: Vec<Box<dyn StoreIterator>>,
    outstanding: usize,
}

impl IteratorPool {
    pub(crate) fn new(view: Arc<dyn StoreRead>, capacity: usize) -> Self {
        Self {
            view,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                outstanding: 0,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn acquire(&self) -> PooledIterator<'_> {
        let mut state = self.state.lock();
        loop {
            if let Some(iter) = state.idle.pop() {
                return PooledIterator {
                    pool: self,
                    iter: Some(iter),
                };
            }
            if state.outstanding < self.capacity {
                state.outstanding += 1;
                drop(state);
                return PooledIterator {
                    pool: self,
                    iter: Some(self.view.iterator()),
                };
            }
            self.available.wait(&mut state);
        }
    }

    fn release(&self, iter: Box<dyn StoreIterator>) {
        let mut state = self.state.lock();
        state.idle.push(iter);
        drop(state);
        self.available.notify_one();
    }
}

pub(crate) struct PooledIterator<'p> {
    pool: &'p IteratorPool,
    iter: Option<Box<dyn StoreIterator>>,
}

impl PooledIterator<'_> {
    pub(crate) fn as_mut(&mut self) -> &mut dyn StoreIterator {
        self.iter.as_mut().expect("iterator present until drop").as_mut()
    }
}

impl Drop for PooledIterator<'_> {
    fn drop(&mut self) {
        if let Some(iter) = self.iter.take() {
            self.pool.release(iter);
        }
    }
}
