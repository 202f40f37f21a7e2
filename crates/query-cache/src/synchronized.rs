//! Mutex adapter from a single-owner store to a shared cache

use crate::cache::{Cache, CacheValue, SharedCache};
use crate::key::CacheKey;
use parking_lot::Mutex;
use query_core::Result;

/// Serializes every operation on the wrapped store with one mutex.
pub struct SynchronizedCache<C: Cache> {
    id: String,
    delegate: Mutex<C>,
}

impl<C: Cache> SynchronizedCache<C> {
    /// Wrap `delegate` in a mutex
    pub fn new(delegate: C) -> Self {
        Self {
            id: delegate.id().to_string(),
            delegate: Mutex::new(delegate),
        }
    }

    /// Run `f` with exclusive access to the wrapped store.
    pub fn with_delegate<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.delegate.lock())
    }
}

impl<C: Cache> SharedCache for SynchronizedCache<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        Ok(self.delegate.lock().get(key))
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.delegate.lock().put(key, value);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        Ok(self.delegate.lock().remove(key))
    }

    fn clear(&self) {
        self.delegate.lock().clear();
    }

    fn size(&self) -> usize {
        self.delegate.lock().size()
    }
}
