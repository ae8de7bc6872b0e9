//! In-memory implementation of [`VersionedStore`].
//!
//! Used for development and the test suite. Besides plain storage it can emulate
//! the properties of the production store that the services must tolerate:
//! read-after-write lag, delayed tombstones and slow calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RowFilter, VersionRow, VersionedStore};
use crate::error::AppResult;

/// Behaviour knobs for [`MemoryStore`]. All default to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStoreOptions {
    /// A row becomes readable only this long after it was written.
    pub read_lag: Duration,
    /// Tombstone requests are applied this long after they were made.
    pub tombstone_delay: Duration,
    /// Every call sleeps this long before touching the data.
    pub latency: Duration,
}

#[derive(Debug)]
struct StoredRow {
    row: VersionRow,
    written_at: Instant,
    tombstoned: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: i64,
    rows: HashMap<(String, Uuid), Vec<StoredRow>>,
}

/// In-memory versioned store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    options: MemoryStoreOptions,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            inner: Arc::default(),
            options,
        }
    }

    /// Total rows held, tombstoned ones included.
    pub async fn row_count(&self) -> usize {
        self.inner.read().await.rows.values().map(Vec::len).sum()
    }

    async fn simulate_latency(&self) {
        if !self.options.latency.is_zero() {
            tokio::time::sleep(self.options.latency).await;
        }
    }

    fn visible(&self, stored: &StoredRow) -> bool {
        !stored.tombstoned && stored.written_at.elapsed() >= self.options.read_lag
    }
}

fn apply_tombstone(inner: &mut Inner, key: &(String, Uuid), up_to_seq: i64) {
    if let Some(rows) = inner.rows.get_mut(key) {
        for stored in rows.iter_mut().filter(|s| s.row.seq <= up_to_seq) {
            stored.tombstoned = true;
        }
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn put_version(&self, mut row: VersionRow) -> AppResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        row.seq = inner.next_seq;
        inner
            .rows
            .entry((row.kind.clone(), row.id))
            .or_default()
            .push(StoredRow {
                row,
                written_at: Instant::now(),
                tombstoned: false,
            });
        Ok(())
    }

    async fn tombstone(&self, kind: &str, id: Uuid) -> AppResult<()> {
        self.simulate_latency().await;
        let key = (kind.to_string(), id);
        let mut inner = self.inner.write().await;
        // Only versions written before the request are covered.
        let up_to_seq = inner.next_seq;

        if self.options.tombstone_delay.is_zero() {
            apply_tombstone(&mut inner, &key, up_to_seq);
        } else {
            drop(inner);
            let shared = Arc::clone(&self.inner);
            let delay = self.options.tombstone_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                apply_tombstone(&mut *shared.write().await, &key, up_to_seq);
            });
        }
        Ok(())
    }

    async fn rows(&self, kind: &str, id: Uuid) -> AppResult<Vec<VersionRow>> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .get(&(kind.to_string(), id))
            .map(|rows| {
                rows.iter()
                    .filter(|s| self.visible(s))
                    .map(|s| s.row.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan(&self, kind: &str, filter: &RowFilter) -> AppResult<Vec<VersionRow>> {
        self.simulate_latency().await;
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .iter()
            .filter(|((k, _), _)| k == kind)
            .flat_map(|(_, rows)| rows.iter())
            .filter(|s| self.visible(s) && filter.matches(&s.row.payload))
            .map(|s| s.row.clone())
            .collect())
    }

    async fn ping(&self) -> AppResult<()> {
        self.simulate_latency().await;
        Ok(())
    }
}
