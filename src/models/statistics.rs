//! # Task Statistics
//!
//! Aggregate progress of a set of tasks. Each task counts as loaded and then
//! falls into exactly one of completed, failed, in progress, or still waiting
//! (`accepted` or missing status). `remaining` is everything not finished:
//! `loaded - completed - failed`.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteExecutor;
use sqlx::FromRow;
use std::collections::HashMap;

use super::group::{Group, GroupWithStatistics};
use crate::state_machine::TaskState;

const COUNT_COLUMNS: &str = "\
    COUNT(t.id) AS loaded, \
    COALESCE(SUM(CASE WHEN t.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed, \
    COALESCE(SUM(CASE WHEN t.status = 'failed' THEN 1 ELSE 0 END), 0) AS failed, \
    COALESCE(SUM(CASE WHEN t.status IN ('parsing', 'converting', 'postprocessing') THEN 1 ELSE 0 END), 0) AS in_progress";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub loaded: i64,
    pub completed: i64,
    pub failed: i64,
    pub in_progress: i64,
    pub remaining: i64,
}

#[derive(Debug, FromRow)]
struct StatusCounts {
    loaded: i64,
    completed: i64,
    failed: i64,
    in_progress: i64,
}

#[derive(Debug, FromRow)]
struct GroupStatusCounts {
    group_id: i64,
    #[sqlx(flatten)]
    counts: StatusCounts,
}

impl From<StatusCounts> for TaskStatistics {
    fn from(counts: StatusCounts) -> Self {
        Self {
            loaded: counts.loaded,
            completed: counts.completed,
            failed: counts.failed,
            in_progress: counts.in_progress,
            remaining: counts.loaded - counts.completed - counts.failed,
        }
    }
}

impl TaskStatistics {
    /// Count one task with the given status
    pub fn record(&mut self, status: Option<TaskState>) {
        self.loaded += 1;
        match status {
            Some(TaskState::Completed) => self.completed += 1,
            Some(TaskState::Failed) => self.failed += 1,
            Some(state) if state.is_active() => self.in_progress += 1,
            _ => {}
        }
        self.remaining = self.loaded - self.completed - self.failed;
    }

    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Option<TaskState>>,
    {
        statuses.into_iter().fold(Self::default(), |mut stats, status| {
            stats.record(status);
            stats
        })
    }

    /// Tasks that are loaded but not yet picked up by a pipeline
    pub fn waiting(&self) -> i64 {
        self.loaded - self.completed - self.failed - self.in_progress
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Statistics over every task in the store
    pub async fn global<'e, E>(executor: E) -> Result<TaskStatistics, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {COUNT_COLUMNS} FROM tasks t");
        let counts = sqlx::query_as::<_, StatusCounts>(&sql)
            .fetch_one(executor)
            .await?;
        Ok(counts.into())
    }

    /// Statistics over the tasks of one group. A group without tasks is all zero.
    pub async fn for_group<'e, E>(executor: E, group_id: i64) -> Result<TaskStatistics, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {COUNT_COLUMNS} FROM tasks t WHERE t.group_id = ?");
        let counts = sqlx::query_as::<_, StatusCounts>(&sql)
            .bind(group_id)
            .fetch_one(executor)
            .await?;
        Ok(counts.into())
    }

    /// Statistics keyed by group id for every group, including empty ones
    pub async fn by_group<'e, E>(executor: E) -> Result<HashMap<i64, TaskStatistics>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT g.id AS group_id, {COUNT_COLUMNS} \
             FROM task_groups g LEFT JOIN tasks t ON t.group_id = g.id \
             GROUP BY g.id"
        );
        let rows = sqlx::query_as::<_, GroupStatusCounts>(&sql)
            .fetch_all(executor)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.group_id, row.counts.into()))
            .collect())
    }
}

impl GroupWithStatistics {
    pub fn new(group: Group, statistics: TaskStatistics) -> Self {
        Self { group, statistics }
    }
}
