use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::constants;
use crate::error::GeoconvResult;

/// Storage for the global pause flag
#[async_trait]
pub trait PauseFlagStore: Send + Sync + fmt::Debug {
    /// Create the flag in the running state if it does not exist yet
    async fn initialize(&self) -> GeoconvResult<()>;

    async fn read(&self) -> GeoconvResult<bool>;

    async fn write(&self, paused: bool) -> GeoconvResult<()>;

    /// Flip the flag and return the new value
    async fn toggle(&self) -> GeoconvResult<bool> {
        let paused = !self.read().await?;
        self.write(paused).await?;
        Ok(paused)
    }
}

/// Flag kept in the shared `control_flags` table, visible to every worker
/// process using the same database
#[derive(Debug, Clone)]
pub struct SqlPauseFlagStore {
    pool: SqlitePool,
}

impl SqlPauseFlagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn encode(paused: bool) -> &'static str {
    if paused {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl PauseFlagStore for SqlPauseFlagStore {
    async fn initialize(&self) -> GeoconvResult<()> {
        sqlx::query("INSERT OR IGNORE INTO control_flags (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(constants::pause::FLAG_KEY)
            .bind(encode(false))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read(&self) -> GeoconvResult<bool> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM control_flags WHERE key = ?")
                .bind(constants::pause::FLAG_KEY)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(value, Some((ref v,)) if v == "true"))
    }

    async fn write(&self, paused: bool) -> GeoconvResult<()> {
        sqlx::query(
            "INSERT INTO control_flags (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(constants::pause::FLAG_KEY)
        .bind(encode(paused))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn toggle(&self) -> GeoconvResult<bool> {
        self.initialize().await?;
        let (value,): (String,) = sqlx::query_as(
            "UPDATE control_flags \
             SET value = CASE value WHEN 'true' THEN 'false' ELSE 'true' END, updated_at = ? \
             WHERE key = ? RETURNING value",
        )
        .bind(Utc::now())
        .bind(constants::pause::FLAG_KEY)
        .fetch_one(&self.pool)
        .await?;
        Ok(value == "true")
    }
}

/// Process-local flag for single-process deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryPauseFlagStore {
    paused: AtomicBool,
}

impl InMemoryPauseFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PauseFlagStore for InMemoryPauseFlagStore {
    async fn initialize(&self) -> GeoconvResult<()> {
        Ok(())
    }

    async fn read(&self) -> GeoconvResult<bool> {
        Ok(self.paused.load(Ordering::SeqCst))
    }

    async fn write(&self, paused: bool) -> GeoconvResult<()> {
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    async fn toggle(&self) -> GeoconvResult<bool> {
        Ok(!self.paused.fetch_xor(true, Ordering::SeqCst))
    }
}
