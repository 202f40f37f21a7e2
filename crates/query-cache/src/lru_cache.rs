//! Least-recently-used eviction decorator

use crate::cache::{Cache, CacheValue};
use crate::key::CacheKey;
use std::num::NonZeroUsize;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounds a delegate store to `capacity` keys.
///
/// Access order lives in an `lru::LruCache<CacheKey, ()>` (a doubly linked
/// list plus hash index) kept beside the delegate; the delegate holds the
/// values. Every `get` or `put` moves the key to the most-recently-used end,
/// and the key evicted from the order list is removed from the delegate.
pub struct LruCache<C: Cache> {
    delegate: C,
    order: lru::LruCache<CacheKey, ()>,
}

impl<C: Cache> LruCache<C> {
    /// Wrap `delegate` with the default capacity
    pub fn new(delegate: C) -> Self {
        Self::with_capacity(delegate, DEFAULT_CAPACITY)
    }

    /// Wrap `delegate`, keeping at most `capacity` entries
    pub fn with_capacity(delegate: C, capacity: usize) -> Self {
        Self {
            delegate,
            order: lru::LruCache::new(non_zero(capacity)),
        }
    }

    /// Get the capacity
    pub fn capacity(&self) -> usize {
        self.order.cap().get()
    }

    /// Change the capacity. Keys that no longer fit are evicted from the
    /// delegate, least recently used first; the rest stay cached.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = non_zero(capacity);
        while self.order.len() > capacity.get() {
            match self.order.pop_lru() {
                Some((eldest, ())) => {
                    self.delegate.remove(&eldest);
                }
                None => break,
            }
        }
        self.order.resize(capacity);
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<CacheKey> {
        self.order.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    fn cycle_key_list(&mut self, key: CacheKey) {
        if let Some((eldest, ())) = self.order.push(key.clone(), ()) {
            if eldest != key {
                self.delegate.remove(&eldest);
            }
        }
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl<C: Cache> Cache for LruCache<C> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn get(&mut self, key: &CacheKey) -> Option<CacheValue> {
        // touch
        self.order.get(key);
        self.delegate.get(key)
    }

    fn put(&mut self, key: CacheKey, value: CacheValue) {
        self.delegate.put(key.clone(), value);
        self.cycle_key_list(key);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheValue> {
        self.order.pop(key);
        self.delegate.remove(key)
    }

    fn clear(&mut self) {
        self.delegate.clear();
        self.order.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}

impl<C: Cache> std::fmt::Debug for LruCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("id", &self.delegate.id())
            .field("capacity", &self.capacity())
            .field("tracked_keys", &self.order.len())
            .field("size", &self.delegate.size())
            .finish()
    }
}
