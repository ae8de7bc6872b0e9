//! Short-lived per-process cache for authentication results.
//!
//! Purely an optimization: every caller must behave correctly with the cache
//! disabled, and writers invalidate entries only after their store write returned.
//!
//! Readers take a [`Ticket`] before reading the store and hand it back on insert.
//! An invalidation leaves a marker behind, and an insert whose ticket predates a
//! marker for its key (or a bulk invalidation) is dropped, so a read that raced a
//! revocation cannot put the revoked value back.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

/// Position in the cache's invalidation sequence, taken before a store read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug)]
enum Slot<V> {
    // `fence` is the latest invalidation of this key the value replaced.
    Value {
        value: V,
        inserted_at: Instant,
        fence: u64,
    },
    Invalidated {
        epoch: u64,
        at: Instant,
    },
}

/// Concurrent map whose entries expire after a fixed TTL. A zero TTL disables it.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Slot<V>>,
    ttl: Duration,
    epoch: AtomicU64,
    // Inserts with a ticket below this are dropped: bulk invalidations and
    // markers that were pruned.
    floor: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: AtomicU64::new(0),
            floor: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Take before reading the value from the store.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.epoch.load(Ordering::SeqCst))
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let (fresh, expired_fence) = {
            let slot = self.entries.get(key)?;
            match &*slot {
                Slot::Value {
                    value, inserted_at, ..
                } if inserted_at.elapsed() < self.ttl => (Some(value.clone()), None),
                Slot::Value { fence, .. } => (None, Some(*fence)),
                Slot::Invalidated { epoch, at } => {
                    (None, (at.elapsed() >= self.ttl).then_some(*epoch))
                }
            }
        };
        if let Some(fence) = expired_fence {
            // Raise the floor before the slot disappears.
            self.floor.fetch_max(fence, Ordering::SeqCst);
            self.entries.remove_if(key, |_, slot| self.is_expired(slot));
        }
        fresh
    }

    fn is_expired(&self, slot: &Slot<V>) -> bool {
        match slot {
            Slot::Value { inserted_at, .. } => inserted_at.elapsed() >= self.ttl,
            Slot::Invalidated { at, .. } => at.elapsed() >= self.ttl,
        }
    }

    /// Insert a value read under `ticket`. Returns false when an invalidation
    /// landed after the ticket was taken and the value was refused.
    pub fn insert(&self, key: K, value: V, ticket: Ticket) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Ticket(read_at) = ticket;
        match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                let fence = match occupied.get() {
                    Slot::Invalidated { epoch, .. } => *epoch,
                    Slot::Value { fence, .. } => *fence,
                };
                if fence > read_at || self.floor.load(Ordering::SeqCst) > read_at {
                    return false;
                }
                occupied.insert(Slot::Value {
                    value,
                    inserted_at: Instant::now(),
                    fence,
                });
            }
            MapEntry::Vacant(vacant) => {
                if self.floor.load(Ordering::SeqCst) > read_at {
                    return false;
                }
                vacant.insert(Slot::Value {
                    value,
                    inserted_at: Instant::now(),
                    fence: 0,
                });
            }
        }
        true
    }

    /// Drop the entry and refuse inserts from reads that began before this call.
    pub fn invalidate(&self, key: &K) {
        if !self.is_enabled() {
            return;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.insert(
            key.clone(),
            Slot::Invalidated {
                epoch,
                at: Instant::now(),
            },
        );
    }

    /// Drop every value for which `keep` returns false and refuse inserts from
    /// any read that began before this call.
    pub fn invalidate_where(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        if !self.is_enabled() {
            return;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.floor.fetch_max(epoch, Ordering::SeqCst);
        self.entries.retain(|key, slot| match slot {
            Slot::Value { value, .. } => keep(key, value),
            Slot::Invalidated { .. } => true,
        });
    }

    /// Number of cached values, markers excluded.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Value { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
