//! # Orchestration Handler
//!
//! Entry point for everything an outer layer (HTTP API, CLI) can ask of the
//! system: submitting batches, restarting and deleting tasks and groups,
//! bundling results, reads, and the pause switch.
//!
//! Multi-row mutations run in one transaction. Per-task side effects
//! (revoking a running attempt, removing files) are fanned out concurrently
//! and joined before the commit; they are best-effort and only logged when
//! they fail. New attempts are dispatched after the commit so a worker never
//! sees uncommitted rows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument, warn};

use super::dispatcher::TaskDispatcher;
use super::pipeline::TaskRun;
use crate::constants::messages;
use crate::database::begin_immediate;
use crate::error::{GeoconvError, GeoconvResult};
use crate::logging::log_task_operation;
use crate::models::{
    new_execution_token, ConversionOptions, Group, GroupWithStatistics, NewTask, Task,
    TaskStatistics,
};
use crate::pause::{PauseGate, PauseState};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use crate::storage::{ArtifactStorage, StagedFile, UploadedFile};

/// A batch of uploads to convert
#[derive(Debug, Clone, Default)]
pub struct CreateTasksRequest {
    pub files: Vec<UploadedFile>,
    /// Group name; defaults to the first file's task name
    pub name: Option<String>,
    /// Accept files whose task name already exists
    pub force_add: bool,
    pub options: ConversionOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTasks {
    pub group_id: i64,
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct OrchestrationHandler {
    pool: SqlitePool,
    storage: Arc<dyn ArtifactStorage>,
    dispatcher: Arc<dyn TaskDispatcher>,
    pause: PauseGate,
}

impl OrchestrationHandler {
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn ArtifactStorage>,
        dispatcher: Arc<dyn TaskDispatcher>,
        pause: PauseGate,
    ) -> Self {
        Self {
            pool,
            storage,
            dispatcher,
            pause,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stage a batch of archives, record one group with one task per archive,
    /// then dispatch every task.
    #[instrument(skip(self, request), fields(files = request.files.len(), force_add = request.force_add))]
    pub async fn create_tasks(&self, request: CreateTasksRequest) -> GeoconvResult<CreatedTasks> {
        let CreateTasksRequest {
            files,
            name,
            force_add,
            options,
        } = request;

        let (archives, rejected): (Vec<_>, Vec<_>) =
            files.into_iter().partition(UploadedFile::is_archive);
        for file in &rejected {
            warn!(file = %file.file_name, "Skipping upload that is not a zip archive");
        }
        if archives.is_empty() {
            return Err(GeoconvError::Validation(messages::NO_ARCHIVES.to_string()));
        }

        let files = if force_add {
            archives
        } else {
            let names: Vec<String> = archives.iter().map(UploadedFile::task_name).collect();
            let existing = Task::existing_names(&self.pool, &names).await?;
            archives
                .into_iter()
                .zip(names)
                .filter_map(|(file, name)| {
                    if existing.contains(&name) {
                        info!(task_name = %name, "Archive already processed, skipping");
                        None
                    } else {
                        Some(file)
                    }
                })
                .collect::<Vec<_>>()
        };
        if files.is_empty() {
            return Err(GeoconvError::Validation(
                messages::NOTHING_TO_PROCESS.to_string(),
            ));
        }

        // Files are written before the write lock is taken
        let staged = self.stage_all(files).await?;

        let (group, tasks) = match self
            .record_batch(name, staged.clone(), force_add, &options)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.remove_staged(&staged).await;
                return Err(e);
            }
        };

        info!(group_id = group.id, group_name = %group.name, tasks = tasks.len(), "Batch accepted");
        join_all(tasks.iter().map(|task| self.dispatch_logged(TaskRun::from(task)))).await;

        Ok(CreatedTasks {
            group_id: group.id,
            task_ids: tasks.iter().map(|task| task.id).collect(),
        })
    }

    /// Start a fresh attempt for one task.
    ///
    /// `force` drops the remote job handle so the archive is resubmitted;
    /// otherwise the new attempt resumes polling the existing job.
    #[instrument(skip(self))]
    pub async fn restart_task(&self, task_id: i64, force: bool) -> GeoconvResult<TaskRun> {
        let mut tx = begin_immediate(&self.pool).await?;
        let task = Task::find_by_id(&mut *tx, task_id)
            .await?
            .ok_or_else(|| GeoconvError::task_not_found(task_id))?;

        let run = reset_task(&mut *tx, &task, force).await?;
        self.release_attempt(&task, false).await;
        tx.commit().await?;

        log_task_operation(
            "restart",
            Some(task.id),
            Some(task.group_id),
            TaskState::Accepted.as_str(),
            None,
        );
        self.dispatch_logged(run.clone()).await;
        Ok(run)
    }

    /// Force-restart every task of a group
    #[instrument(skip(self))]
    pub async fn restart_group(&self, group_id: i64) -> GeoconvResult<Vec<TaskRun>> {
        let mut tx = begin_immediate(&self.pool).await?;
        if Group::find_by_id(&mut *tx, group_id).await?.is_none() {
            return Err(GeoconvError::group_not_found(group_id));
        }
        let tasks = Task::list_by_group(&mut *tx, group_id, None).await?;

        let mut runs = Vec::with_capacity(tasks.len());
        for task in &tasks {
            runs.push(reset_task(&mut *tx, task, true).await?);
        }
        join_all(tasks.iter().map(|task| self.release_attempt(task, false))).await;
        Group::touch(&mut *tx, group_id).await?;
        tx.commit().await?;

        info!(group_id, tasks = runs.len(), "Group restarted");
        join_all(runs.iter().cloned().map(|run| self.dispatch_logged(run))).await;
        Ok(runs)
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: i64) -> GeoconvResult<()> {
        let mut tx = begin_immediate(&self.pool).await?;
        let task = Task::find_by_id(&mut *tx, task_id)
            .await?
            .ok_or_else(|| GeoconvError::task_not_found(task_id))?;

        Task::delete(&mut *tx, task.id).await?;
        self.release_attempt(&task, true).await;
        tx.commit().await?;

        log_task_operation(
            "delete",
            Some(task.id),
            Some(task.group_id),
            task.status.as_str(),
            None,
        );
        Ok(())
    }

    /// Delete a group with all of its tasks and their files
    #[instrument(skip(self))]
    pub async fn delete_group(&self, group_id: i64) -> GeoconvResult<()> {
        let mut tx = begin_immediate(&self.pool).await?;
        if Group::find_by_id(&mut *tx, group_id).await?.is_none() {
            return Err(GeoconvError::group_not_found(group_id));
        }
        let tasks = Task::list_by_group(&mut *tx, group_id, None).await?;

        for task in &tasks {
            Task::delete(&mut *tx, task.id).await?;
        }
        join_all(tasks.iter().map(|task| self.release_attempt(task, true))).await;
        Group::delete(&mut *tx, group_id).await?;
        tx.commit().await?;

        info!(group_id, tasks = tasks.len(), "Group deleted");
        Ok(())
    }

    /// Resume every unfinished task. Called once at process start.
    ///
    /// Tasks keep their remote job handle, so jobs already submitted are
    /// polled again rather than resubmitted.
    pub async fn restart_working_tasks(&self) -> GeoconvResult<Vec<TaskRun>> {
        let mut tx = begin_immediate(&self.pool).await?;
        let tasks = Task::list_non_terminal(&mut *tx).await?;

        let mut runs = Vec::with_capacity(tasks.len());
        for task in &tasks {
            runs.push(reset_task(&mut *tx, task, false).await?);
        }
        join_all(tasks.iter().map(|task| self.release_attempt(task, false))).await;
        tx.commit().await?;

        if !runs.is_empty() {
            info!(tasks = runs.len(), "Resuming unfinished tasks");
        }
        join_all(runs.iter().cloned().map(|run| self.dispatch_logged(run))).await;
        Ok(runs)
    }

    /// Pack every available result of a group into one archive
    pub async fn download_group(&self, group_id: i64) -> GeoconvResult<PathBuf> {
        self.require_group(group_id).await?;
        let tasks = Task::list_by_group(&self.pool, group_id, None).await?;

        let mut paths = Vec::new();
        for path in tasks.iter().filter_map(Task::result_path) {
            if self.storage.exists(&path).await {
                paths.push(path);
            } else {
                warn!(file = %path.display(), "Result file is missing, leaving it out of the bundle");
            }
        }

        let bundle = self.storage.bundle(&paths).await?;
        info!(group_id, files = paths.len(), bundle = %bundle.display(), "Group results bundled");
        Ok(bundle)
    }

    pub async fn get_task(&self, task_id: i64) -> GeoconvResult<Task> {
        Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or_else(|| GeoconvError::task_not_found(task_id))
    }

    /// Tasks of one group, or of all groups, optionally narrowed by status
    pub async fn list_tasks(
        &self,
        group_id: Option<i64>,
        status: Option<TaskState>,
    ) -> GeoconvResult<Vec<Task>> {
        match group_id {
            Some(group_id) => Ok(Task::list_by_group(&self.pool, group_id, status).await?),
            None => {
                let tasks = Task::list_all(&self.pool).await?;
                Ok(match status {
                    Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
                    None => tasks,
                })
            }
        }
    }

    pub async fn get_group(&self, group_id: i64) -> GeoconvResult<GroupWithStatistics> {
        let group = self.require_group(group_id).await?;
        let statistics = TaskStatistics::for_group(&self.pool, group_id).await?;
        Ok(GroupWithStatistics::new(group, statistics))
    }

    pub async fn list_groups(&self) -> GeoconvResult<Vec<GroupWithStatistics>> {
        let groups = Group::list_all(&self.pool).await?;
        let mut statistics = TaskStatistics::by_group(&self.pool).await?;
        Ok(groups
            .into_iter()
            .map(|group| {
                let stats = statistics.remove(&group.id).unwrap_or_default();
                GroupWithStatistics::new(group, stats)
            })
            .collect())
    }

    pub async fn statistics(&self) -> GeoconvResult<TaskStatistics> {
        Ok(TaskStatistics::global(&self.pool).await?)
    }

    /// Location of a task's converted archive
    pub async fn task_result_path(&self, task_id: i64) -> GeoconvResult<PathBuf> {
        let task = self.get_task(task_id).await?;
        self.existing_file(task.result_path(), "Task result", task_id).await
    }

    /// Location of a task's uploaded archive
    pub async fn task_source_path(&self, task_id: i64) -> GeoconvResult<PathBuf> {
        let task = self.get_task(task_id).await?;
        self.existing_file(task.source_path(), "Task source", task_id).await
    }

    pub async fn pause_state(&self) -> GeoconvResult<PauseState> {
        self.pause.state().await
    }

    pub async fn toggle_pause(&self) -> GeoconvResult<PauseState> {
        self.pause.toggle().await
    }

    pub async fn set_pause(&self) -> GeoconvResult<()> {
        self.pause.set_pause().await
    }

    pub async fn unset_pause(&self) -> GeoconvResult<()> {
        self.pause.unset_pause().await
    }

    /// Insert the group and its tasks in one transaction. Without `force_add`
    /// names are checked again under the write lock; staged files that lost
    /// that race are removed.
    async fn record_batch(
        &self,
        name: Option<String>,
        staged: Vec<StagedFile>,
        force_add: bool,
        options: &ConversionOptions,
    ) -> GeoconvResult<(Group, Vec<Task>)> {
        let mut tx = begin_immediate(&self.pool).await?;

        let staged = if force_add {
            staged
        } else {
            let names: Vec<String> = staged.iter().map(|file| file.name.clone()).collect();
            let existing = Task::existing_names(&mut *tx, &names).await?;
            let (duplicates, fresh): (Vec<_>, Vec<_>) = staged
                .into_iter()
                .partition(|file| existing.contains(&file.name));
            self.remove_staged(&duplicates).await;
            fresh
        };
        if staged.is_empty() {
            return Err(GeoconvError::Validation(
                messages::NOTHING_TO_PROCESS.to_string(),
            ));
        }

        let group_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| staged[0].name.clone());

        let rows = insert_batch(&mut *tx, &group_name, &staged, options).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn require_group(&self, group_id: i64) -> GeoconvResult<Group> {
        Group::find_by_id(&self.pool, group_id)
            .await?
            .ok_or_else(|| GeoconvError::group_not_found(group_id))
    }

    async fn existing_file(
        &self,
        path: Option<PathBuf>,
        entity: &'static str,
        task_id: i64,
    ) -> GeoconvResult<PathBuf> {
        match path {
            Some(path) if self.storage.exists(&path).await => Ok(path),
            _ => Err(GeoconvError::NotFound {
                entity,
                id: task_id,
            }),
        }
    }

    /// Write every upload to staging. On any failure the ones already
    /// written are removed again.
    async fn stage_all(&self, files: Vec<UploadedFile>) -> GeoconvResult<Vec<StagedFile>> {
        let results = join_all(files.into_iter().map(|file| self.storage.stage(file))).await;

        let mut staged = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(file) => staged.push(file),
                Err(e) => {
                    warn!(error = %e, "Failed to stage upload");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                self.remove_staged(&staged).await;
                Err(e.into())
            }
            None => Ok(staged),
        }
    }

    async fn remove_staged(&self, staged: &[StagedFile]) {
        join_all(staged.iter().map(|file| self.remove_file(&file.path))).await;
    }

    /// Stop the attempt the task currently owns and drop its result. With
    /// `with_source` the uploaded archive goes too.
    async fn release_attempt(&self, task: &Task, with_source: bool) {
        self.dispatcher.revoke(&task.execution_token).await;
        if let Some(result) = task.result_path() {
            self.remove_file(&result).await;
        }
        if with_source {
            if let Some(source) = task.source_path() {
                self.remove_file(&source).await;
            }
        }
    }

    async fn remove_file(&self, path: &Path) {
        if let Err(e) = self.storage.delete(path).await {
            warn!(file = %path.display(), error = %e, "Failed to remove file");
        }
    }

    async fn dispatch_logged(&self, run: TaskRun) {
        let task_id = run.task_id;
        if let Err(e) = self.dispatcher.dispatch(run).await {
            warn!(task_id, error = %e, "Dispatch failed, task stays accepted until next startup");
        }
    }
}

/// Insert the group and one accepted task per staged file
async fn insert_batch(
    conn: &mut SqliteConnection,
    group_name: &str,
    staged: &[StagedFile],
    options: &ConversionOptions,
) -> GeoconvResult<(Group, Vec<Task>)> {
    let group = Group::create(&mut *conn, group_name).await?;

    let mut tasks = Vec::with_capacity(staged.len());
    for file in staged {
        let new_task = NewTask {
            name: file.name.clone(),
            group_id: group.id,
            source_artifact_path: Some(file.path.to_string_lossy().into_owned()),
            options: options.clone(),
        };
        tasks.push(Task::create(&mut *conn, new_task).await?);
    }
    Ok((group, tasks))
}

/// Put a task back to `accepted` under a fresh execution token
async fn reset_task(conn: &mut SqliteConnection, task: &Task, force: bool) -> GeoconvResult<TaskRun> {
    let token = new_execution_token();
    let mut patch = TaskStateMachine::build_patch(TaskState::Accepted, &TaskEvent::Restart)
        .execution_token(token.clone());
    if force {
        patch = patch.remote_job_handle(None);
    }

    if !Task::update(&mut *conn, task.id, &patch).await? {
        return Err(GeoconvError::task_not_found(task.id));
    }
    Ok(TaskRun::new(task.id, token))
}
