//! # Database Migration System
//!
//! Schema migrations are embedded at compile time from `migrations/` using the
//! `YYYYMMDDHHMMSS_description.sql` naming convention and tracked by sqlx in
//! `_sqlx_migrations`, so running them repeatedly is a no-op.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::SqlitePool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies the embedded schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all outstanding migrations in order
    pub async fn run_all(pool: &SqlitePool) -> Result<(), MigrateError> {
        MIGRATOR.run(pool).await?;
        info!(
            migrations = MIGRATOR.iter().count(),
            "Database schema is up to date"
        );
        Ok(())
    }
}
