//! Hit-ratio logging decorator

use crate::cache::{Cache, CacheValue};
use crate::key::CacheKey;
use crate::stats::CacheStats;
use std::sync::Arc;
use tracing::debug;

/// Counts lookups on the delegate and logs the running hit ratio.
pub struct LoggingCache<C: Cache> {
    delegate: C,
    stats: Arc<CacheStats>,
}

impl<C: Cache> LoggingCache<C> {
    /// Wrap `delegate` with fresh statistics
    pub fn new(delegate: C) -> Self {
        Self {
            delegate,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Handle to the counters; stays valid after the cache is wrapped further.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl<C: Cache> Cache for LoggingCache<C> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn get(&mut self, key: &CacheKey) -> Option<CacheValue> {
        let value = self.delegate.get(key);
        match &value {
            Some(v) if !v.is_null() => self.stats.record_hit(),
            _ => self.stats.record_miss(),
        }
        debug!(
            "Cache Hit Ratio [{}]: {}",
            self.delegate.id(),
            self.stats.hit_rate()
        );
        value
    }

    fn put(&mut self, key: CacheKey, value: CacheValue) {
        self.stats.record_put();
        self.delegate.put(key, value);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheValue> {
        self.delegate.remove(key)
    }

    fn clear(&mut self) {
        self.stats.record_clear();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
