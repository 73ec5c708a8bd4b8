//! Builders for tasks in arbitrary states, bypassing the pipeline

use std::path::PathBuf;

use geoconv_core::models::{ConversionOptions, Group, NewTask, Task, TaskPatch};
use geoconv_core::state_machine::TaskState;
use sqlx::SqlitePool;

use super::unique_name;

pub async fn create_group(pool: &SqlitePool, name: &str) -> Group {
    Group::create(pool, name)
        .await
        .expect("Failed to create test group")
}

/// Builder pattern for creating test Tasks
pub struct TaskBuilder {
    group_id: i64,
    name: Option<String>,
    status: TaskState,
    handle: Option<String>,
    source: Option<PathBuf>,
    result: Option<PathBuf>,
    error: Option<String>,
}

impl TaskBuilder {
    pub fn new(group_id: i64) -> Self {
        Self {
            group_id,
            name: None,
            status: TaskState::Accepted,
            handle: None,
            source: None,
            result: None,
            error: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_status(mut self, status: TaskState) -> Self {
        self.status = status;
        self
    }

    pub fn with_handle(mut self, handle: &str) -> Self {
        self.handle = Some(handle.to_string());
        self
    }

    pub fn with_source(mut self, path: PathBuf) -> Self {
        self.source = Some(path);
        self
    }

    pub fn with_result(mut self, path: PathBuf) -> Self {
        self.result = Some(path);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub async fn build(self, pool: &SqlitePool) -> Task {
        let task = Task::create(
            pool,
            NewTask {
                name: self.name.unwrap_or_else(|| unique_name("extract")),
                group_id: self.group_id,
                source_artifact_path: self.source.map(|p| p.to_string_lossy().into_owned()),
                options: ConversionOptions::default(),
            },
        )
        .await
        .expect("Failed to create test task");

        let patch = TaskPatch::new()
            .status(self.status)
            .remote_job_handle(self.handle)
            .result_artifact_path(self.result.map(|p| p.to_string_lossy().into_owned()))
            .error(self.error);
        Task::update(pool, task.id, &patch)
            .await
            .expect("Failed to update test task");

        Task::find_by_id(pool, task.id)
            .await
            .expect("Failed to reload test task")
            .expect("Test task disappeared")
    }
}
