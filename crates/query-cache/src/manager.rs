//! Transactional cache bookkeeping for one unit of work

use crate::cache::{CacheValue, SharedCache};
use crate::key::CacheKey;
use crate::transactional::TransactionalCache;
use query_core::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns one [`TransactionalCache`] per shared-cache namespace touched by the
/// current transaction. Wrappers are created on first use, so untouched
/// namespaces cost nothing at commit or rollback.
#[derive(Debug, Default)]
pub struct TransactionalCacheManager {
    transactional_caches: HashMap<String, TransactionalCache>,
}

impl TransactionalCacheManager {
    /// Create a manager with no wrappers
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `key` through the transaction's view of `cache`
    pub fn get(&mut self, cache: &Arc<dyn SharedCache>, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.transactional_cache(cache).get(key)
    }

    /// Buffer a write until commit
    pub fn put(&mut self, cache: &Arc<dyn SharedCache>, key: CacheKey, value: CacheValue) {
        self.transactional_cache(cache).put(key, value);
    }

    /// Schedule a clear of `cache` at commit
    pub fn clear(&mut self, cache: &Arc<dyn SharedCache>) {
        self.transactional_cache(cache).clear();
    }

    /// Commit every wrapper. All wrappers are committed even when one fails;
    /// the first failure is returned.
    pub fn commit(&mut self) -> Result<()> {
        let mut first_error = None;
        for tx_cache in self.transactional_caches.values_mut() {
            if let Err(e) = tx_cache.commit() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard buffered writes and release the key locks of missed reads.
    pub fn rollback(&mut self) {
        for tx_cache in self.transactional_caches.values_mut() {
            tx_cache.rollback();
        }
    }

    /// Namespaces touched so far.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.transactional_caches.keys().map(String::as_str)
    }

    /// Number of namespaces touched
    pub fn len(&self) -> usize {
        self.transactional_caches.len()
    }

    /// Whether no namespace has been touched
    pub fn is_empty(&self) -> bool {
        self.transactional_caches.is_empty()
    }

    fn transactional_cache(&mut self, cache: &Arc<dyn SharedCache>) -> &mut TransactionalCache {
        self.transactional_caches
            .entry(cache.id().to_string())
            .or_insert_with(|| TransactionalCache::new(Arc::clone(cache)))
    }
}
