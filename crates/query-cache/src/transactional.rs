//! Per-transaction write buffer over a shared cache

use crate::cache::{usable, CacheValue, SharedCache};
use crate::key::CacheKey;
use query_core::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Buffers second-level writes of one transaction.
///
/// Nothing put here reaches the shared cache before [`commit`]. Keys that were
/// looked up and missed are remembered so a blocking cache underneath gets
/// its locks back on both commit and rollback.
///
/// [`commit`]: TransactionalCache::commit
pub struct TransactionalCache {
    delegate: Arc<dyn SharedCache>,
    clear_on_commit: bool,
    entries_to_add_on_commit: HashMap<CacheKey, CacheValue>,
    entries_missed_in_cache: HashSet<CacheKey>,
}

impl TransactionalCache {
    /// Wrap `delegate` with an empty buffer
    pub fn new(delegate: Arc<dyn SharedCache>) -> Self {
        Self {
            delegate,
            clear_on_commit: false,
            entries_to_add_on_commit: HashMap::new(),
            entries_missed_in_cache: HashSet::new(),
        }
    }

    /// Id of the wrapped cache
    pub fn id(&self) -> &str {
        self.delegate.id()
    }

    /// Committed size of the wrapped cache
    pub fn size(&self) -> usize {
        self.delegate.size()
    }

    /// Reads through to the shared cache; stored nulls count as misses.
    /// After a `clear` in this transaction every read is a miss.
    pub fn get(&mut self, key: &CacheKey) -> Result<Option<CacheValue>> {
        let value = usable(self.delegate.get(key)?);
        if value.is_none() {
            self.entries_missed_in_cache.insert(key.clone());
        }
        if self.clear_on_commit {
            Ok(None)
        } else {
            Ok(value)
        }
    }

    /// Buffer a write until commit
    pub fn put(&mut self, key: CacheKey, value: CacheValue) {
        self.entries_to_add_on_commit.insert(key, value);
    }

    /// The clear is deferred to commit; buffered writes are dropped now.
    pub fn clear(&mut self) {
        self.clear_on_commit = true;
        self.entries_to_add_on_commit.clear();
    }

    /// Writes waiting for commit
    pub fn pending_writes(&self) -> usize {
        self.entries_to_add_on_commit.len()
    }

    /// Keys read as misses in this transaction
    pub fn missed_keys(&self) -> usize {
        self.entries_missed_in_cache.len()
    }

    /// Whether commit will clear the wrapped cache first
    pub fn is_clear_on_commit(&self) -> bool {
        self.clear_on_commit
    }

    /// Publish the buffer: optional clear, pending writes, then a null for
    /// each missed key that was never filled (releasing its lock).
    ///
    /// Every write is attempted even if one fails; the first failure is
    /// returned after the buffer has been reset.
    pub fn commit(&mut self) -> Result<()> {
        if self.clear_on_commit {
            self.delegate.clear();
        }
        let result = self.flush_pending_entries();
        self.reset();
        result
    }

    /// Discard the buffer and release the locks of missed keys. Never fails.
    pub fn rollback(&mut self) {
        self.unlock_missed_entries();
        self.reset();
    }

    fn flush_pending_entries(&mut self) -> Result<()> {
        let mut first_error = None;
        let pending = std::mem::take(&mut self.entries_to_add_on_commit);
        let missed = std::mem::take(&mut self.entries_missed_in_cache);

        debug!(
            "Committing {} entries and {} missed keys to cache {}",
            pending.len(),
            missed.len(),
            self.delegate.id()
        );

        let unfilled: Vec<CacheKey> = missed
            .into_iter()
            .filter(|k| !pending.contains_key(k))
            .collect();
        for (key, value) in pending {
            if let Err(e) = self.delegate.put(key, value) {
                first_error.get_or_insert(e);
            }
        }
        for key in unfilled {
            if let Err(e) = self.delegate.put(key, CacheValue::Null) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unlock_missed_entries(&mut self) {
        for key in self.entries_missed_in_cache.drain() {
            if let Err(e) = self.delegate.remove(&key) {
                warn!(
                    "Unexpected exception while notifying a rollback to the cache adapter. \
                     Consider upgrading your cache adapter to the latest version. Cause: {}",
                    e
                );
            }
        }
    }

    fn reset(&mut self) {
        self.clear_on_commit = false;
        self.entries_to_add_on_commit.clear();
        self.entries_missed_in_cache.clear();
    }
}

impl std::fmt::Debug for TransactionalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalCache")
            .field("id", &self.delegate.id())
            .field("clear_on_commit", &self.clear_on_commit)
            .field("pending_writes", &self.entries_to_add_on_commit.len())
            .field("missed_keys", &self.entries_missed_in_cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockingCache;
    use crate::cache::PerpetualCache;
    use crate::synchronized::SynchronizedCache;
    use query_core::{ParameterObject, QueryError};
    use std::thread;
    use std::time::Duration;

    fn shared() -> Arc<dyn SharedCache> {
        Arc::new(SynchronizedCache::new(PerpetualCache::new("ns")))
    }

    fn key(n: i64) -> CacheKey {
        CacheKey::from_components([n])
    }

    fn value(n: i64) -> CacheValue {
        CacheValue::Parameters(ParameterObject::scalar(n))
    }

    #[test]
    fn test_put_invisible_until_commit() {
        let store = shared();
        let mut tx = TransactionalCache::new(Arc::clone(&store));

        tx.put(key(1), value(1));
        assert_eq!(tx.get(&key(1)).unwrap(), None);
        assert_eq!(store.get(&key(1)).unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), Some(value(1)));
    }

    #[test]
    fn test_rollback_leaves_store_unchanged() {
        let store = shared();
        store.put(key(2), value(2)).unwrap();
        let mut tx = TransactionalCache::new(Arc::clone(&store));

        tx.put(key(1), value(1));
        tx.clear();
        tx.rollback();

        assert_eq!(store.get(&key(1)).unwrap(), None);
        assert_eq!(store.get(&key(2)).unwrap(), Some(value(2)));
        assert_eq!(tx.pending_writes(), 0);
        assert!(!tx.is_clear_on_commit());
    }

    #[test]
    fn test_clear_hides_existing_and_voids_earlier_puts() {
        let store = shared();
        store.put(key(1), value(1)).unwrap();
        let mut tx = TransactionalCache::new(Arc::clone(&store));

        tx.put(key(2), value(2));
        tx.clear();
        assert_eq!(tx.get(&key(1)).unwrap(), None);
        assert_eq!(store.get(&key(1)).unwrap(), Some(value(1)));

        tx.put(key(3), value(3));
        tx.commit().unwrap();

        assert_eq!(store.get(&key(1)).unwrap(), None);
        assert_eq!(store.get(&key(2)).unwrap(), None);
        assert_eq!(store.get(&key(3)).unwrap(), Some(value(3)));
    }

    #[test]
    fn test_commit_writes_null_for_unfilled_misses() {
        let store = shared();
        let mut tx = TransactionalCache::new(Arc::clone(&store));

        assert_eq!(tx.get(&key(1)).unwrap(), None);
        assert_eq!(tx.get(&key(2)).unwrap(), None);
        tx.put(key(2), value(2));
        assert_eq!(tx.missed_keys(), 2);
        tx.commit().unwrap();

        assert_eq!(store.get(&key(1)).unwrap(), Some(CacheValue::Null));
        assert_eq!(store.get(&key(2)).unwrap(), Some(value(2)));
        assert_eq!(tx.missed_keys(), 0);
    }

    #[test]
    fn test_commit_releases_blocking_locks() {
        let store: Arc<dyn SharedCache> = Arc::new(BlockingCache::with_timeout(
            SynchronizedCache::new(PerpetualCache::new("ns")),
            Duration::from_millis(100),
        ));
        let mut tx = TransactionalCache::new(Arc::clone(&store));
        assert_eq!(tx.get(&key(1)).unwrap(), None);
        tx.commit().unwrap();

        let other = Arc::clone(&store);
        let seen = thread::spawn(move || other.get(&key(1))).join().unwrap();
        // the committed null is not a usable value, so the other thread now holds the lock
        assert_eq!(seen.unwrap(), Some(CacheValue::Null));
    }

    #[test]
    fn test_rollback_releases_blocking_locks() {
        let store: Arc<dyn SharedCache> = Arc::new(BlockingCache::with_timeout(
            SynchronizedCache::new(PerpetualCache::new("ns")),
            Duration::from_millis(100),
        ));
        let mut tx = TransactionalCache::new(Arc::clone(&store));
        assert_eq!(tx.get(&key(1)).unwrap(), None);

        let blocked = {
            let other = Arc::clone(&store);
            thread::spawn(move || other.get(&key(1))).join().unwrap()
        };
        assert!(matches!(blocked, Err(QueryError::CacheTimeout { .. })));

        tx.put(key(1), value(1));
        tx.rollback();

        let other = Arc::clone(&store);
        let seen = thread::spawn(move || other.get(&key(1))).join().unwrap();
        assert_eq!(seen.unwrap(), None);
        assert_eq!(store.size(), 0);
    }
}
