//! Bounded FIFO that evicts its oldest entry when full.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed-capacity queue with drop-oldest overflow.
///
/// Every operation is O(1) and holds the internal lock only for the duration
/// of the queue manipulation; no callback ever runs under it.
#[derive(Debug)]
pub struct DropOldestBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T> DropOldestBuffer<T> {
    /// Create an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, returning the evicted oldest item if the buffer was full.
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.lock();
        let evicted = if items.len() == self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// Remove and return the oldest item.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard everything, returning how many items were dropped.
    pub fn clear(&self) -> usize {
        // Items are dropped after the lock is released.
        let drained: VecDeque<T> = std::mem::take(&mut *self.lock());
        drained.len()
    }
}
