use sqlx::SqlitePool;

use super::{
    errors::{invalid_transition, StateMachineResult},
    events::TaskEvent,
    persistence::TaskTransitionPersistence,
    states::TaskState,
};
use crate::models::{TaskPatch, WriteOutcome};

/// State machine for one execution attempt of one task.
///
/// Holds the attempt's view of the current state; the store stays the source
/// of truth and rejects writes once the attempt's token is replaced.
#[derive(Debug)]
pub struct TaskStateMachine {
    task_id: i64,
    execution_token: String,
    current: TaskState,
    persistence: TaskTransitionPersistence,
}

impl TaskStateMachine {
    pub fn new(
        task_id: i64,
        execution_token: impl Into<String>,
        current: TaskState,
        pool: SqlitePool,
    ) -> Self {
        Self {
            task_id,
            execution_token: execution_token.into(),
            current,
            persistence: TaskTransitionPersistence::new(pool),
        }
    }

    pub fn current_state(&self) -> TaskState {
        self.current
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn execution_token(&self) -> &str {
        &self.execution_token
    }

    /// Validate and persist a transition.
    ///
    /// Returns [`WriteOutcome::Superseded`] without changing local state when
    /// the attempt no longer owns the task.
    pub async fn transition(&mut self, event: TaskEvent) -> StateMachineResult<WriteOutcome> {
        let target = Self::determine_target_state(self.current, &event)?;
        let patch = Self::build_patch(target, &event);

        let outcome = self
            .persistence
            .persist_transition(self.task_id, &self.execution_token, self.current, &patch)
            .await?;

        if outcome.is_applied() {
            self.current = target;
        }
        Ok(outcome)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Accepted, TaskEvent::Start) => TaskState::Parsing,
            (TaskState::Parsing, TaskEvent::Submitted { .. }) => TaskState::Converting,
            (TaskState::Accepted, TaskEvent::Resume) => TaskState::Converting,
            (TaskState::Converting, TaskEvent::ResultReady) => TaskState::Postprocessing,
            (TaskState::Postprocessing, TaskEvent::Complete { .. }) => TaskState::Completed,

            (from, TaskEvent::Fail(_)) if !from.is_terminal() => TaskState::Failed,

            (_, TaskEvent::Restart) => TaskState::Accepted,

            (from, event) => return Err(invalid_transition(from, event.event_type())),
        };

        Ok(target)
    }

    /// Column changes that accompany a transition
    pub fn build_patch(target: TaskState, event: &TaskEvent) -> TaskPatch {
        let patch = TaskPatch::new().status(target);
        match event {
            TaskEvent::Submitted { handle } => patch.remote_job_handle(Some(handle.clone())),
            TaskEvent::Complete { result_path } => patch
                .result_artifact_path(Some(result_path.clone()))
                .error(None),
            TaskEvent::Fail(message) => patch
                .error(Some(message.clone()))
                .result_artifact_path(None),
            TaskEvent::Restart => patch.error(None).result_artifact_path(None),
            _ => patch,
        }
    }
}
