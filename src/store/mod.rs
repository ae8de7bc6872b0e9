//! Append-only versioned storage.
//!
//! Every logical entity is a sequence of immutable rows keyed by `(kind, id)`.
//! Updates append a new row, deletes append a removal marker and request an
//! asynchronous tombstone, and reads resolve the row with the greatest
//! `(updated_at, seq)` among the rows that are not tombstoned yet.
//!
//! Backends only store and return raw rows. Resolution lives in [`Versions`] so
//! that no multi-row read can skip the dedup-by-id step.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::AppResult;

pub use memory::{MemoryStore, MemoryStoreOptions};
pub use postgres::PostgresStore;

/// One stored version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRow {
    pub kind: String,
    pub id: Uuid,
    /// Insertion sequence assigned by the store; breaks `updated_at` ties.
    pub seq: i64,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Equality filter over payload fields.
///
/// Only fields that never change across the versions of an entity may be used
/// (ids, hashes, workspace ids). Filtering on a mutable field before resolution
/// would match stale versions whose latest version no longer qualifies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    fields: Vec<(&'static str, String)>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &'static str, value: impl ToString) -> Self {
        self.fields.push((field, value.to_string()));
        self
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    /// Whether a payload satisfies every clause (text comparison, like `->>` in SQL).
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.fields.iter().all(|(field, expected)| {
            payload
                .get(*field)
                .and_then(json_as_text)
                .is_some_and(|actual| actual == *expected)
        })
    }
}

fn json_as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Raw append-only store.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Append a row. Never mutates existing rows.
    async fn put_version(&self, row: VersionRow) -> AppResult<()>;

    /// Request deletion of every version of `(kind, id)` written so far.
    ///
    /// Best effort and possibly asynchronous: rows may stay visible for a while.
    async fn tombstone(&self, kind: &str, id: Uuid) -> AppResult<()>;

    /// All visible, non-tombstoned rows of one entity, in any order.
    async fn rows(&self, kind: &str, id: Uuid) -> AppResult<Vec<VersionRow>>;

    /// All visible, non-tombstoned rows of a kind matching `filter`, in any order.
    async fn scan(&self, kind: &str, filter: &RowFilter) -> AppResult<Vec<VersionRow>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> AppResult<()>;
}

/// An entity stored as a sequence of versions.
pub trait Versioned: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Row kind, one per entity type.
    const KIND: &'static str;

    fn id(&self) -> Uuid;

    fn updated_at(&self) -> DateTime<Utc>;

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Whether this version is a removal marker. Removed entities resolve as absent.
    fn is_removed(&self) -> bool {
        false
    }
}

/// Keep only the greatest `(updated_at, seq)` row per id.
pub fn latest_per_id(rows: Vec<VersionRow>) -> Vec<VersionRow> {
    let mut latest: HashMap<Uuid, VersionRow> = HashMap::new();
    for row in rows {
        match latest.get(&row.id) {
            Some(current) if (current.updated_at, current.seq) >= (row.updated_at, row.seq) => {}
            _ => {
                latest.insert(row.id, row);
            }
        }
    }
    let mut rows: Vec<VersionRow> = latest.into_values().collect();
    rows.sort_by_key(|row| (row.updated_at, row.seq));
    rows
}

/// Typed access to a [`VersionedStore`] with per-call timeouts.
///
/// Writes return the value exactly as written. Callers that need read-your-writes
/// must carry that value forward; an immediate re-read may not observe it.
#[derive(Clone)]
pub struct Versions {
    store: Arc<dyn VersionedStore>,
    timeout: Duration,
}

impl Versions {
    pub fn new(store: Arc<dyn VersionedStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Same store, different per-call timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.store
    }

    async fn timed<T>(&self, fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.timeout, fut).await?
    }

    /// Append `value` as a new version stamped with the current time.
    pub async fn put<T: Versioned>(&self, mut value: T) -> AppResult<T> {
        value.set_updated_at(Utc::now());
        let row = VersionRow {
            kind: T::KIND.to_string(),
            id: value.id(),
            seq: 0,
            updated_at: value.updated_at(),
            payload: serde_json::to_value(&value)?,
        };
        self.timed(self.store.put_version(row)).await?;
        Ok(value)
    }

    /// Append a removal marker version, then request a tombstone.
    ///
    /// `removed` must already carry the marker (`is_removed() == true`).
    pub async fn remove<T: Versioned>(&self, removed: T) -> AppResult<T> {
        debug_assert!(removed.is_removed());
        let written = self.put(removed).await?;
        if let Err(err) = self.tombstone::<T>(written.id()).await {
            tracing::warn!(kind = T::KIND, id = %written.id(), error = %err, "Tombstone request failed");
        }
        Ok(written)
    }

    pub async fn tombstone<T: Versioned>(&self, id: Uuid) -> AppResult<()> {
        self.timed(self.store.tombstone(T::KIND, id)).await
    }

    /// Current value of one entity, or `None` when absent or removed.
    pub async fn resolve_latest<T: Versioned>(&self, id: Uuid) -> AppResult<Option<T>> {
        let rows = self.timed(self.store.rows(T::KIND, id)).await?;
        match latest_per_id(rows).pop() {
            Some(row) => {
                let value: T = serde_json::from_value(row.payload)?;
                Ok((!value.is_removed()).then_some(value))
            }
            None => Ok(None),
        }
    }

    /// Current value of every entity with a row matching `filter`.
    pub async fn resolve_latest_many<T: Versioned>(&self, filter: RowFilter) -> AppResult<Vec<T>> {
        let rows = self.timed(self.store.scan(T::KIND, &filter)).await?;
        let mut values = Vec::new();
        for row in latest_per_id(rows) {
            let value: T = serde_json::from_value(row.payload)?;
            if !value.is_removed() {
                values.push(value);
            }
        }
        Ok(values)
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.timed(self.store.ping()).await
    }
}
