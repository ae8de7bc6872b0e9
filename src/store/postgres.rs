//! PostgreSQL implementation of [`VersionedStore`] using SeaORM.
//!
//! All entity kinds share the `entity_versions` table. Filters are evaluated
//! against the JSONB payload with `->>`, so they compare text.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use uuid::Uuid;

use super::{RowFilter, VersionRow, VersionedStore};
use crate::db::DbPool;
use crate::entity::entity_version::{self as version, Entity as EntityVersion};
use crate::error::AppResult;

/// Versioned store backed by the `entity_versions` table.
#[derive(Clone)]
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn model_to_row(m: version::Model) -> VersionRow {
    VersionRow {
        kind: m.kind,
        id: m.entity_id,
        seq: m.seq,
        updated_at: m.updated_at,
        payload: m.payload,
    }
}

fn is_filter_field(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
}

#[async_trait]
impl VersionedStore for PostgresStore {
    async fn put_version(&self, row: VersionRow) -> AppResult<()> {
        let model = version::ActiveModel {
            seq: NotSet,
            kind: Set(row.kind),
            entity_id: Set(row.id),
            updated_at: Set(row.updated_at),
            payload: Set(row.payload),
            tombstoned_at: Set(None),
        };

        EntityVersion::insert(model)
            .exec(self.pool.connection())
            .await?;

        Ok(())
    }

    async fn tombstone(&self, kind: &str, id: Uuid) -> AppResult<()> {
        let requested_at = Utc::now();

        let result = EntityVersion::update_many()
            .col_expr(
                version::Column::TombstonedAt,
                Expr::value(Some(requested_at)),
            )
            .filter(version::Column::Kind.eq(kind))
            .filter(version::Column::EntityId.eq(id))
            .filter(version::Column::TombstonedAt.is_null())
            // Versions stamped after the request stay live.
            .filter(version::Column::UpdatedAt.lte(requested_at))
            .exec(self.pool.connection())
            .await?;

        tracing::debug!(kind, %id, rows = result.rows_affected, "Tombstoned versions");
        Ok(())
    }

    async fn rows(&self, kind: &str, id: Uuid) -> AppResult<Vec<VersionRow>> {
        let models = EntityVersion::find()
            .filter(version::Column::Kind.eq(kind))
            .filter(version::Column::EntityId.eq(id))
            .filter(version::Column::TombstonedAt.is_null())
            .all(self.pool.connection())
            .await?;

        Ok(models.into_iter().map(model_to_row).collect())
    }

    async fn scan(&self, kind: &str, filter: &RowFilter) -> AppResult<Vec<VersionRow>> {
        let mut select = EntityVersion::find()
            .filter(version::Column::Kind.eq(kind))
            .filter(version::Column::TombstonedAt.is_null());

        for (field, value) in filter.fields() {
            // Field names are compile-time constants; the guard keeps them out of
            // reach of anything that is not a plain identifier.
            if !is_filter_field(field) {
                return Err(crate::error::AppError::Internal(format!(
                    "Invalid filter field: {field}"
                )));
            }
            select = select.filter(Expr::cust_with_values(
                format!("payload->>'{field}' = $1"),
                [value.clone()],
            ));
        }

        let models = select.all(self.pool.connection()).await?;
        Ok(models.into_iter().map(model_to_row).collect())
    }

    async fn ping(&self) -> AppResult<()> {
        self.pool.ping().await
    }
}
