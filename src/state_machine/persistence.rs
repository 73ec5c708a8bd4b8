use sqlx::SqlitePool;
use tracing::{debug, info};

use super::errors::PersistenceResult;
use super::states::TaskState;
use crate::models::{Task, TaskPatch, WriteOutcome};

/// Writes status transitions for one execution attempt.
///
/// Every write is conditioned on the attempt's execution token, so a run that
/// was superseded by a restart or delete cannot overwrite the newer state.
#[derive(Debug, Clone)]
pub struct TaskTransitionPersistence {
    pool: SqlitePool,
}

impl TaskTransitionPersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn persist_transition(
        &self,
        task_id: i64,
        execution_token: &str,
        from: TaskState,
        patch: &TaskPatch,
    ) -> PersistenceResult<WriteOutcome> {
        let outcome = Task::update_if_current(&self.pool, task_id, execution_token, patch).await?;

        match outcome {
            WriteOutcome::Applied => debug!(
                task_id = task_id,
                execution_token = %execution_token,
                from = %from,
                to = ?patch.status,
                "Transition persisted"
            ),
            WriteOutcome::Superseded => info!(
                task_id = task_id,
                execution_token = %execution_token,
                from = %from,
                to = ?patch.status,
                "Transition discarded, execution attempt superseded"
            ),
        }

        Ok(outcome)
    }
}
