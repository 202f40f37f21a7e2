//! Per-key locking decorator that prevents cache stampedes
//!
//! A `get` that misses keeps the key's lock, so concurrent callers asking for
//! the same key wait until the first caller has either stored a value with
//! `put` or given up with `remove`. Only one caller at a time recomputes a
//! missing entry.
//!
//! The lock table only grows: locks are released but never dropped. That
//! keeps acquisition free of reference counting at the cost of one small
//! entry per distinct key ever requested.

use crate::cache::{CacheValue, SharedCache};
use crate::key::CacheKey;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use query_core::{QueryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct KeyLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Serializes misses per key. A reader that misses holds the key until it
/// puts a value; other readers of that key wait on it.
pub struct BlockingCache<S: SharedCache> {
    delegate: S,
    /// Zero waits indefinitely.
    timeout: Duration,
    locks: DashMap<CacheKey, Arc<KeyLock>>,
    interrupted: AtomicBool,
}

impl<S: SharedCache> BlockingCache<S> {
    /// Wrap `delegate`, waiting indefinitely for key locks
    pub fn new(delegate: S) -> Self {
        Self::with_timeout(delegate, Duration::ZERO)
    }

    /// Wrap `delegate`, failing lock waits after `timeout`
    pub fn with_timeout(delegate: S, timeout: Duration) -> Self {
        Self {
            delegate,
            timeout,
            locks: DashMap::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Lock wait timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of keys that ever had a lock.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Tear down: every thread waiting for a key lock wakes up and fails with
    /// `CacheInterrupted`, as does every later acquisition.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let locks: Vec<Arc<KeyLock>> = self.locks.iter().map(|e| Arc::clone(e.value())).collect();
        for lock in locks {
            // Taking the mutex orders this wake-up after any waiter's flag check.
            let _owner = lock.owner.lock();
            lock.released.notify_all();
        }
    }

    /// Whether [`interrupt`](Self::interrupt) has been called
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn lock_for_key(&self, key: &CacheKey) -> Arc<KeyLock> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }
        let entry = self.locks.entry(key.clone()).or_default();
        Arc::clone(entry.value())
    }

    fn acquire_lock(&self, key: &CacheKey) -> Result<()> {
        let lock = self.lock_for_key(key);
        let me = thread::current().id();
        let deadline = (!self.timeout.is_zero()).then(|| Instant::now() + self.timeout);

        let mut owner = lock.owner.lock();
        loop {
            if self.is_interrupted() {
                return Err(QueryError::CacheInterrupted {
                    cache: self.delegate.id().to_string(),
                    key: key.to_string(),
                });
            }
            match *owner {
                None => {
                    *owner = Some(me);
                    return Ok(());
                }
                // Holding is idempotent: one release frees the key.
                Some(holder) if holder == me => return Ok(()),
                Some(_) => {}
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(QueryError::CacheTimeout {
                            cache: self.delegate.id().to_string(),
                            key: key.to_string(),
                            timeout: self.timeout,
                        });
                    }
                    let _ = lock.released.wait_until(&mut owner, deadline);
                }
                None => lock.released.wait(&mut owner),
            }
        }
    }

    /// Release the key if the current thread holds it; otherwise do nothing.
    fn release_lock(&self, key: &CacheKey) {
        let lock = match self.locks.get(key) {
            Some(lock) => Arc::clone(lock.value()),
            None => return,
        };
        let mut owner = lock.owner.lock();
        if *owner == Some(thread::current().id()) {
            *owner = None;
            drop(owner);
            lock.released.notify_one();
        } else {
            trace!("Skipping release of {} not held by this thread", key);
        }
    }
}

impl<S: SharedCache> SharedCache for BlockingCache<S> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    /// Acquires the key's lock first. A usable value releases it again; a
    /// miss returns `None` with the lock still held.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.acquire_lock(key)?;
        match self.delegate.get(key) {
            Ok(value) => {
                if matches!(&value, Some(v) if !v.is_null()) {
                    self.release_lock(key);
                }
                Ok(value)
            }
            Err(e) => {
                self.release_lock(key);
                Err(e)
            }
        }
    }

    fn put(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        let result = self.delegate.put(key.clone(), value);
        self.release_lock(&key);
        result
    }

    /// Releases the key's lock without touching the delegate. This is the
    /// miss-release path used when a caller gives up on filling a key.
    fn remove(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.release_lock(key);
        Ok(None)
    }

    fn clear(&self) {
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
