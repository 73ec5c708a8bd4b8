//! # Group Model
//!
//! A group is one submitted batch of archives. It owns its tasks; deleting a
//! group cascades to them. Aggregate progress is derived from the tasks on
//! read (see [`TaskStatistics`](super::TaskStatistics)) and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteExecutor;
use sqlx::FromRow;

use super::statistics::TaskStatistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Group together with its derived task statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWithStatistics {
    #[serde(flatten)]
    pub group: Group,
    pub statistics: TaskStatistics,
}

impl Group {
    pub async fn create<'e, E>(executor: E, name: &str) -> Result<Group, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO task_groups (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Group>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as::<_, Group>(
            "SELECT id, name, created_at, updated_at FROM task_groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// All groups, oldest first
    pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Group>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as::<_, Group>(
            "SELECT id, name, created_at, updated_at FROM task_groups ORDER BY created_at, id",
        )
        .fetch_all(executor)
        .await
    }

    /// Delete the group row. Returns whether a row was removed.
    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM task_groups WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Touch `updated_at`, used when the group's membership changes state
    pub async fn touch<'e, E>(executor: E, id: i64) -> Result<(), sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE task_groups SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
