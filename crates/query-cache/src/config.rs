//! Cache configuration options

use crate::lru_cache::DEFAULT_CAPACITY;
use std::time::Duration;

/// Configuration for a namespace's shared cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries kept by the LRU layer
    pub capacity: usize,
    /// Whether lookups take a per-key lock (stampede protection)
    pub blocking: bool,
    /// How long a blocked lookup waits; zero waits indefinitely
    pub blocking_timeout: Duration,
    /// Whether statements of the namespace use the cache at all
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            blocking: false,
            blocking_timeout: Duration::ZERO,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a config with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Create a disabled cache configuration
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set blocking
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Also turns blocking on.
    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking = true;
        self.blocking_timeout = timeout;
        self
    }

    /// Set whether the cache is built at all
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
