//! In-process mutual exclusion keyed by an id (a workspace, an email).
//!
//! Only serializes callers within this process. An entry lives while someone
//! holds or waits for its lock and is dropped with the last guard.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = DashMap<K, Arc<Mutex<()>>>;

pub struct KeyedLocks<K>
where
    K: Eq + Hash,
{
    locks: Arc<LockMap<K>>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }
}

/// Held lock for one key. Dropping it releases the lock.
pub struct KeyedGuard<K>
where
    K: Eq + Hash,
{
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap<K>>,
    key: K,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub async fn acquire(&self, key: K) -> KeyedGuard<K> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyedGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
            key,
        }
    }

    /// Keys with a holder or a waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only taken under the shard lock, so a count of one means
        // nobody holds or waits for this key.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
