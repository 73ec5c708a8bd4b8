//! # Task Model
//!
//! One task converts one staged archive. Tasks are created in the same
//! transaction as their group, mutated by the pipeline through token-guarded
//! patches and by operator restart/delete.
//!
//! ## Execution tokens
//!
//! Every (re)start stamps a fresh `execution_token`. Pipeline writes go
//! through [`Task::update_if_current`], which only matches the row while the
//! token is unchanged. A run whose token was replaced by a restart, or whose
//! row was deleted, sees [`WriteOutcome::Superseded`] and stops.
//!
//! ## Database Schema
//!
//! Maps to the `tasks` table:
//! - `id`: Primary key (INTEGER)
//! - `group_id`: Owning group, cascades on delete
//! - `name`: Derived from the source archive stem, used for deduplication
//! - `status`: [`TaskState`] stored as snake_case text
//! - `options`: [`ConversionOptions`] stored as JSON

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteExecutor};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder};
use uuid::Uuid;

use super::options::ConversionOptions;
use crate::state_machine::TaskState;

const TASK_COLUMNS: &str = "id, name, group_id, remote_job_handle, execution_token, \
     source_artifact_path, result_artifact_path, status, error, options, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub remote_job_handle: Option<String>,
    pub execution_token: String,
    pub source_artifact_path: Option<String>,
    pub result_artifact_path: Option<String>,
    pub status: TaskState,
    pub error: Option<String>,
    pub options: Json<ConversionOptions>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Task for creation (without generated fields)
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub group_id: i64,
    pub source_artifact_path: Option<String>,
    pub options: ConversionOptions,
}

/// Result of a token-guarded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The row no longer carries the expected token (restarted or deleted)
    Superseded,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Typed partial update of a task row.
///
/// Each field is `None` when untouched. Nullable columns use
/// `Some(None)` to clear the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskState>,
    pub remote_job_handle: Option<Option<String>>,
    pub execution_token: Option<String>,
    pub source_artifact_path: Option<Option<String>>,
    pub result_artifact_path: Option<Option<String>>,
    pub error: Option<Option<String>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskState) -> Self {
        self.status = Some(status);
        self
    }

    pub fn remote_job_handle(mut self, handle: Option<String>) -> Self {
        self.remote_job_handle = Some(handle);
        self
    }

    pub fn execution_token(mut self, token: impl Into<String>) -> Self {
        self.execution_token = Some(token.into());
        self
    }

    pub fn source_artifact_path(mut self, path: Option<String>) -> Self {
        self.source_artifact_path = Some(path);
        self
    }

    pub fn result_artifact_path(mut self, path: Option<String>) -> Self {
        self.result_artifact_path = Some(path);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn build_update<'a>(&'a self, id: i64, expected_token: Option<&'a str>) -> QueryBuilder<'a, Sqlite> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE tasks SET updated_at = ");
        builder.push_bind(Utc::now());

        if let Some(status) = self.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(handle) = &self.remote_job_handle {
            builder.push(", remote_job_handle = ").push_bind(handle.as_deref());
        }
        if let Some(token) = &self.execution_token {
            builder.push(", execution_token = ").push_bind(token.as_str());
        }
        if let Some(path) = &self.source_artifact_path {
            builder.push(", source_artifact_path = ").push_bind(path.as_deref());
        }
        if let Some(path) = &self.result_artifact_path {
            builder.push(", result_artifact_path = ").push_bind(path.as_deref());
        }
        if let Some(error) = &self.error {
            builder.push(", error = ").push_bind(error.as_deref());
        }

        builder.push(" WHERE id = ").push_bind(id);
        if let Some(token) = expected_token {
            builder.push(" AND execution_token = ").push_bind(token);
        }
        builder
    }
}

/// Fresh execution token for a new attempt
pub fn new_execution_token() -> String {
    Uuid::new_v4().to_string()
}

impl Task {
    pub fn options(&self) -> &ConversionOptions {
        &self.options.0
    }

    pub fn source_path(&self) -> Option<PathBuf> {
        self.source_artifact_path.as_ref().map(PathBuf::from)
    }

    pub fn result_path(&self) -> Option<PathBuf> {
        self.result_artifact_path.as_ref().map(PathBuf::from)
    }

    /// Insert a task in `accepted` state with a fresh execution token
    pub async fn create<'e, E>(executor: E, new_task: NewTask) -> Result<Task, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO tasks (name, group_id, execution_token, source_artifact_path, status, options, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {TASK_COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(&new_task.name)
            .bind(new_task.group_id)
            .bind(new_execution_token())
            .bind(&new_task.source_artifact_path)
            .bind(TaskState::Accepted)
            .bind(Json(new_task.options.clone()))
            .bind(now)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Task>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Task>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at, id");
        sqlx::query_as::<_, Task>(&sql).fetch_all(executor).await
    }

    /// Tasks of one group, optionally narrowed to a single status
    pub async fn list_by_group<'e, E>(
        executor: E,
        group_id: i64,
        status: Option<TaskState>,
    ) -> Result<Vec<Task>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = "
        ));
        builder.push_bind(group_id);
        if let Some(status) = status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder.push(" ORDER BY created_at, id");

        builder.build_query_as::<Task>().fetch_all(executor).await
    }

    /// Every task not in a terminal state, in creation order
    pub async fn list_non_terminal<'e, E>(executor: E) -> Result<Vec<Task>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IS NULL OR status NOT IN ('completed', 'failed') \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, Task>(&sql).fetch_all(executor).await
    }

    /// Subset of `names` that already belong to some task
    pub async fn existing_names<'e, E>(
        executor: E,
        names: &[String],
    ) -> Result<HashSet<String>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        if names.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT DISTINCT name FROM tasks WHERE name IN (");
        let mut separated = builder.separated(", ");
        for name in names {
            separated.push_bind(name.as_str());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String,)> = builder.build_query_as().fetch_all(executor).await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Apply a patch unconditionally. Returns whether the row exists.
    pub async fn update<'e, E>(executor: E, id: i64, patch: &TaskPatch) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let mut builder = patch.build_update(id, None);
        let result = builder.build().execute(executor).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a patch only while the row still carries `execution_token`
    pub async fn update_if_current<'e, E>(
        executor: E,
        id: i64,
        execution_token: &str,
        patch: &TaskPatch,
    ) -> Result<WriteOutcome, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let mut builder = patch.build_update(id, Some(execution_token));
        let result = builder.build().execute(executor).await?;
        Ok(if result.rows_affected() > 0 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Superseded
        })
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
