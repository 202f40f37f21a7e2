//! Result caches for the statement executor
//!
//! This crate provides the cache keys, stores and decorators behind both
//! cache tiers of the executor.
//!
//! # Features
//!
//! - **CacheKey**: ordered composite identity with a running hash
//! - **LRU Eviction**: least recently used keys are evicted at capacity
//! - **Blocking**: per-key locks so only one caller recomputes a missing entry
//! - **Transactional**: writes buffered until commit, locks released on rollback
//! - **Statistics**: hit/miss counters logged through `tracing`
//!
//! # Example
//!
//! ```ignore
//! use query_cache::{CacheBuilder, CacheConfig, TransactionalCacheManager};
//!
//! let cache = CacheBuilder::new("users")
//!     .config(CacheConfig::default().with_blocking(true))
//!     .build();
//!
//! let mut tcm = TransactionalCacheManager::new();
//! if tcm.get(&cache, &key)?.is_none() {
//!     let rows = run_query()?;
//!     tcm.put(&cache, key, CacheValue::List(rows));
//! }
//! tcm.commit()?;
//! ```

pub mod blocking;
pub mod builder;
pub mod cache;
pub mod config;
pub mod key;
pub mod logging;
pub mod lru_cache;
pub mod manager;
pub mod stats;
pub mod synchronized;
pub mod transactional;

pub use blocking::BlockingCache;
pub use builder::{BuiltCache, CacheBuilder};
pub use cache::{usable, Cache, CacheValue, PerpetualCache, SharedCache};
pub use config::CacheConfig;
pub use key::CacheKey;
pub use logging::LoggingCache;
pub use lru_cache::LruCache;
pub use manager::TransactionalCacheManager;
pub use stats::CacheStats;
pub use synchronized::SynchronizedCache;
pub use transactional::TransactionalCache;
