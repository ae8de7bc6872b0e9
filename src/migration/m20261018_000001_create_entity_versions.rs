//! Migration: Create entity_versions table.
//!
//! Append-only version log backing every versioned entity (users, sessions,
//! API keys, API key usage, workspace memberships, password resets).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE entity_versions (
                    seq BIGSERIAL PRIMARY KEY,
                    kind VARCHAR(40) NOT NULL,
                    entity_id UUID NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    payload JSONB NOT NULL,
                    tombstoned_at TIMESTAMPTZ
                );

                -- Resolve one entity (all of its live versions)
                CREATE INDEX idx_entity_versions_kind_id
                    ON entity_versions(kind, entity_id, updated_at DESC, seq DESC)
                    WHERE tombstoned_at IS NULL;

                -- Immutable lookup fields used by scans
                CREATE INDEX idx_entity_versions_workspace
                    ON entity_versions(kind, (payload ->> 'workspace_id'))
                    WHERE tombstoned_at IS NULL;

                CREATE INDEX idx_entity_versions_user
                    ON entity_versions(kind, (payload ->> 'user_id'))
                    WHERE tombstoned_at IS NULL;

                CREATE INDEX idx_entity_versions_hash
                    ON entity_versions(kind, (payload ->> 'key_hash'))
                    WHERE tombstoned_at IS NULL;

                CREATE INDEX idx_entity_versions_token_hash
                    ON entity_versions(kind, (payload ->> 'token_hash'))
                    WHERE tombstoned_at IS NULL;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS entity_versions CASCADE;")
            .await?;

        Ok(())
    }
}
