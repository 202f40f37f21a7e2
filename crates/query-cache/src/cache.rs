//! Cache SPIs and the base in-memory store
//!
//! Two traits share the same vocabulary:
//!
//! - [`Cache`] is owned by a single writer and takes `&mut self`. The
//!   first-level cache of an executor and the store-level decorators
//!   ([`crate::LruCache`], [`crate::LoggingCache`]) implement it.
//! - [`SharedCache`] is the second-level contract, shared across sessions
//!   behind an `Arc`. [`crate::SynchronizedCache`] adapts any [`Cache`] into
//!   it and [`crate::BlockingCache`] decorates it further.

use crate::key::CacheKey;
use query_core::{ParameterObject, Result, ResultObject};
use std::collections::HashMap;

/// A value held by a cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// An explicitly stored null. Distinct from an absent key at the store
    /// level, but never a usable hit.
    Null,
    /// Marks a first-level entry whose query is still executing.
    Placeholder,
    List(Vec<ResultObject>),
    Parameters(ParameterObject),
}

impl CacheValue {
    /// Whether this is a stored null
    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    /// Whether this marks a query in progress
    pub fn is_placeholder(&self) -> bool {
        matches!(self, CacheValue::Placeholder)
    }

    /// Take the result list, if this holds one
    pub fn into_list(self) -> Option<Vec<ResultObject>> {
        match self {
            CacheValue::List(list) => Some(list),
            _ => None,
        }
    }
}

/// Drops stored nulls, leaving only values a caller can use.
pub fn usable(value: Option<CacheValue>) -> Option<CacheValue> {
    value.filter(|v| !v.is_null())
}

/// Single-owner cache store.
pub trait Cache: Send {
    fn id(&self) -> &str;

    /// `None` means absent; a stored null comes back as `Some(CacheValue::Null)`.
    fn get(&mut self, key: &CacheKey) -> Option<CacheValue>;

    fn put(&mut self, key: CacheKey, value: CacheValue);

    fn remove(&mut self, key: &CacheKey) -> Option<CacheValue>;

    fn clear(&mut self);

    fn size(&self) -> usize;
}

/// Cache shared by every session of a namespace.
pub trait SharedCache: Send + Sync {
    fn id(&self) -> &str;

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>>;

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()>;

    /// Removes the entry. Decorators may give this a different meaning; see
    /// [`crate::BlockingCache::remove`].
    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>>;

    fn clear(&self);

    fn size(&self) -> usize;
}

/// Unbounded hash-map store with no eviction and no locking.
#[derive(Debug, Default)]
pub struct PerpetualCache {
    id: String,
    entries: HashMap<CacheKey, CacheValue>,
}

impl PerpetualCache {
    /// Create an empty cache
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: HashMap::new(),
        }
    }

    /// Lookup without `&mut`; the store keeps no access bookkeeping.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.entries.get(key)
    }
}

impl Cache for PerpetualCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&mut self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: CacheKey, value: CacheValue) {
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn size(&self) -> usize {
        self.entries.len()
    }
}
