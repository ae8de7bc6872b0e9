//! SeaORM entity definitions for PostgreSQL database.

pub mod entity_version;
