//! # Task Dispatcher
//!
//! Hands execution attempts to workers. [`LocalDispatcher`] runs each attempt
//! as a Tokio task on the current runtime, bounded by a semaphore, and keeps
//! an abort handle per execution token so that a restart or delete can stop
//! the superseded attempt early. Revocation is best-effort; the token check
//! on every status write remains authoritative.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::pipeline::{RunOutcome, TaskPipeline, TaskRun};
use crate::error::{GeoconvError, GeoconvResult};

#[async_trait]
pub trait TaskDispatcher: Send + Sync + fmt::Debug {
    /// Queue an attempt. Returns once the attempt is accepted, not finished.
    async fn dispatch(&self, run: TaskRun) -> GeoconvResult<()>;

    /// Stop the attempt holding `execution_token` if it is still running
    async fn revoke(&self, execution_token: &str);
}

#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    pipeline: Arc<TaskPipeline>,
    semaphore: Arc<Semaphore>,
    running: Arc<DashMap<String, AbortHandle>>,
}

impl LocalDispatcher {
    pub fn new(pipeline: Arc<TaskPipeline>, max_concurrent_tasks: usize) -> Self {
        Self {
            pipeline,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Attempts dispatched and not yet finished, including ones waiting for a slot
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Abort every attempt still in flight
    pub fn shutdown(&self) {
        self.semaphore.close();
        let tokens: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            if let Some((_, handle)) = self.running.remove(&token) {
                handle.abort();
            }
        }
        info!("Dispatcher stopped");
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn dispatch(&self, run: TaskRun) -> GeoconvResult<()> {
        if self.semaphore.is_closed() {
            return Err(GeoconvError::Dispatch("dispatcher is shut down".to_string()));
        }

        let pipeline = self.pipeline.clone();
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();
        let token = run.execution_token.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            // Wait until the abort handle is tracked so the removal below
            // cannot race the insert.
            let _ = registered_rx.await;

            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => pipeline.run(&run).await,
                Err(_) => Err(GeoconvError::Dispatch("dispatcher is shut down".to_string())),
            };

            match outcome {
                Ok(RunOutcome::Completed { result_path }) => debug!(
                    task_id = run.task_id,
                    result = %result_path.display(),
                    "Attempt finished"
                ),
                Ok(RunOutcome::Failed { error }) => {
                    debug!(task_id = run.task_id, error = %error, "Attempt finished with failure")
                }
                Ok(RunOutcome::Superseded) => {
                    debug!(task_id = run.task_id, "Attempt superseded")
                }
                Ok(RunOutcome::Skipped { status }) => {
                    debug!(task_id = run.task_id, status = %status, "Attempt skipped")
                }
                Err(e) => error!(task_id = run.task_id, error = %e, "Attempt aborted"),
            }

            running.remove(&run.execution_token);
        });

        self.running.insert(token, join.abort_handle());
        if registered_tx.send(()).is_err() {
            warn!("Dispatched attempt ended before registration");
        }
        Ok(())
    }

    async fn revoke(&self, execution_token: &str) {
        if let Some((_, handle)) = self.running.remove(execution_token) {
            handle.abort();
            info!(execution_token = %execution_token, "Revoked running attempt");
        }
    }
}
