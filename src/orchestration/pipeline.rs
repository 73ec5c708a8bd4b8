//! # Task Pipeline
//!
//! Drives one execution attempt of one task through
//! `accepted → parsing → converting → postprocessing → completed`.
//!
//! Every status write goes through [`TaskStateMachine`], which only persists
//! while the task still carries the attempt's execution token. Once a write
//! comes back [`WriteOutcome::Superseded`] the attempt stops without touching
//! the task again, and any result it already saved is removed.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use super::backoff_calculator::BackoffCalculator;
use super::poller::RemoteJobPoller;
use crate::error::{GeoconvError, GeoconvResult};
use crate::hooks::{run_hook, ArtifactHook};
use crate::logging::{log_error, log_task_operation};
use crate::models::{Task, WriteOutcome};
use crate::pause::PauseGate;
use crate::remote::ConversionClient;
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use crate::storage::ArtifactStorage;

/// One execution attempt: the task and the token the attempt owns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: i64,
    pub execution_token: String,
}

impl TaskRun {
    pub fn new(task_id: i64, execution_token: impl Into<String>) -> Self {
        Self {
            task_id,
            execution_token: execution_token.into(),
        }
    }
}

impl From<&Task> for TaskRun {
    fn from(task: &Task) -> Self {
        Self::new(task.id, task.execution_token.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { result_path: PathBuf },
    Failed { error: String },
    /// The task was restarted or deleted while the attempt ran
    Superseded,
    /// The task was not waiting to be processed
    Skipped { status: TaskState },
}

#[derive(Debug)]
pub struct TaskPipeline {
    pool: SqlitePool,
    pause: PauseGate,
    client: Arc<dyn ConversionClient>,
    storage: Arc<dyn ArtifactStorage>,
    pre_hook: Arc<dyn ArtifactHook>,
    post_hook: Arc<dyn ArtifactHook>,
    poller: RemoteJobPoller,
}

impl TaskPipeline {
    pub fn new(
        pool: SqlitePool,
        pause: PauseGate,
        client: Arc<dyn ConversionClient>,
        storage: Arc<dyn ArtifactStorage>,
        pre_hook: Arc<dyn ArtifactHook>,
        post_hook: Arc<dyn ArtifactHook>,
        backoff: BackoffCalculator,
    ) -> Self {
        let poller = RemoteJobPoller::new(client.clone(), storage.clone(), backoff);
        Self {
            pool,
            pause,
            client,
            storage,
            pre_hook,
            post_hook,
            poller,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute one attempt.
    ///
    /// Returns `Err` only when the failure could not be recorded on the task
    /// (for example the database is unreachable).
    #[instrument(skip(self), fields(task_id = run.task_id))]
    pub async fn run(&self, run: &TaskRun) -> GeoconvResult<RunOutcome> {
        self.pause.wait_if_paused().await?;

        let Some(task) = Task::find_by_id(&self.pool, run.task_id).await? else {
            info!("Task no longer exists, dropping attempt");
            return Ok(RunOutcome::Superseded);
        };
        if task.execution_token != run.execution_token {
            info!("Task was restarted, dropping stale attempt");
            return Ok(RunOutcome::Superseded);
        }
        if task.status != TaskState::Accepted {
            warn!(status = %task.status, "Task is not awaiting processing, skipping");
            return Ok(RunOutcome::Skipped {
                status: task.status,
            });
        }

        let mut machine = TaskStateMachine::new(
            task.id,
            run.execution_token.clone(),
            task.status,
            self.pool.clone(),
        );
        let mut saved_result: Option<PathBuf> = None;

        match self.drive(&mut machine, &task, &mut saved_result).await {
            Ok(Some(result_path)) => {
                log_task_operation(
                    "conversion",
                    Some(task.id),
                    Some(task.group_id),
                    TaskState::Completed.as_str(),
                    Some(&result_path.display().to_string()),
                );
                Ok(RunOutcome::Completed { result_path })
            }
            Ok(None) => {
                info!(state = %machine.current_state(), "Attempt superseded");
                self.discard_result(saved_result).await;
                Ok(RunOutcome::Superseded)
            }
            Err(err) => {
                self.discard_result(saved_result).await;
                let message = err.to_string();
                log_error(
                    "task_pipeline",
                    "conversion",
                    &message,
                    Some(machine.current_state().as_str()),
                );
                match machine.transition(TaskEvent::Fail(message.clone())).await? {
                    WriteOutcome::Applied => {
                        log_task_operation(
                            "conversion",
                            Some(task.id),
                            Some(task.group_id),
                            TaskState::Failed.as_str(),
                            Some(&message),
                        );
                        Ok(RunOutcome::Failed { error: message })
                    }
                    WriteOutcome::Superseded => Ok(RunOutcome::Superseded),
                }
            }
        }
    }

    /// Walk the task to `completed`. `Ok(None)` means superseded.
    async fn drive(
        &self,
        machine: &mut TaskStateMachine,
        task: &Task,
        saved_result: &mut Option<PathBuf>,
    ) -> GeoconvResult<Option<PathBuf>> {
        let handle = match task.remote_job_handle.clone() {
            Some(handle) => {
                if !advance(machine, TaskEvent::Resume).await? {
                    return Ok(None);
                }
                info!(handle = %handle, "Resuming remote job");
                handle
            }
            None => {
                if !advance(machine, TaskEvent::Start).await? {
                    return Ok(None);
                }
                let handle = self.submit(task).await?;
                if !advance(machine, TaskEvent::Submitted { handle: handle.clone() }).await? {
                    return Ok(None);
                }
                handle
            }
        };

        let result_path = self.poller.wait_for_result(&task.name, &handle).await?;
        *saved_result = Some(result_path.clone());

        if !advance(machine, TaskEvent::ResultReady).await? {
            return Ok(None);
        }
        run_hook(self.post_hook.clone(), result_path.clone()).await?;

        let complete = TaskEvent::Complete {
            result_path: result_path.to_string_lossy().into_owned(),
        };
        if !advance(machine, complete).await? {
            return Ok(None);
        }
        Ok(Some(result_path))
    }

    async fn submit(&self, task: &Task) -> GeoconvResult<String> {
        let source = task.source_path().ok_or_else(|| {
            GeoconvError::Validation(format!("task {} has no source archive", task.id))
        })?;

        run_hook(self.pre_hook.clone(), source.clone()).await?;

        let handle = self
            .client
            .submit(&source, &task.name, task.options())
            .await?;
        info!(handle = %handle, "Archive submitted for conversion");
        Ok(handle)
    }

    async fn discard_result(&self, saved_result: Option<PathBuf>) {
        let Some(path) = saved_result else {
            return;
        };
        if let Err(e) = self.storage.delete(&path).await {
            warn!(file = %path.display(), error = %e, "Failed to remove orphaned result");
        } else {
            debug!(file = %path.display(), "Removed result of abandoned attempt");
        }
    }
}

/// Persist a transition; `false` when the attempt has been superseded
async fn advance(machine: &mut TaskStateMachine, event: TaskEvent) -> GeoconvResult<bool> {
    Ok(machine.transition(event).await?.is_applied())
}
