//! Assembly of the standard shared-cache decorator chain

use crate::blocking::BlockingCache;
use crate::cache::{PerpetualCache, SharedCache};
use crate::config::CacheConfig;
use crate::logging::LoggingCache;
use crate::lru_cache::LruCache;
use crate::stats::CacheStats;
use crate::synchronized::SynchronizedCache;
use std::sync::Arc;

/// A built shared cache plus the statistics handle of its logging layer.
pub struct BuiltCache {
    pub cache: Arc<dyn SharedCache>,
    pub stats: Arc<CacheStats>,
}

/// Builds `PerpetualCache -> LruCache -> LoggingCache -> SynchronizedCache`,
/// topped by a `BlockingCache` when the config asks for one.
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    id: String,
    config: CacheConfig,
}

impl CacheBuilder {
    /// Start building a cache for namespace `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: CacheConfig::default(),
        }
    }

    /// Replace the whole config
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the LRU capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set whether misses block per key
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.config.blocking = blocking;
        self
    }

    /// Build the decorated cache
    pub fn build(self) -> Arc<dyn SharedCache> {
        self.build_with_stats().cache
    }

    /// Build the decorated cache and keep a handle on its statistics
    pub fn build_with_stats(self) -> BuiltCache {
        let store = PerpetualCache::new(self.id);
        let lru = LruCache::with_capacity(store, self.config.capacity);
        let logging = LoggingCache::new(lru);
        let stats = logging.stats();
        let synchronized = SynchronizedCache::new(logging);

        let cache: Arc<dyn SharedCache> = if self.config.blocking {
            Arc::new(BlockingCache::with_timeout(
                synchronized,
                self.config.blocking_timeout,
            ))
        } else {
            Arc::new(synchronized)
        };

        BuiltCache { cache, stats }
    }
}
