use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::backoff_calculator::BackoffCalculator;
use crate::constants::messages;
use crate::error::{GeoconvError, GeoconvResult};
use crate::remote::{ConversionClient, RemoteError, RemoteJobState};
use crate::storage::{ArtifactFolder, ArtifactStorage};

/// Waits for a remote job to finish and stores its result locally
#[derive(Debug, Clone)]
pub struct RemoteJobPoller {
    client: Arc<dyn ConversionClient>,
    storage: Arc<dyn ArtifactStorage>,
    backoff: BackoffCalculator,
}

impl RemoteJobPoller {
    pub fn new(
        client: Arc<dyn ConversionClient>,
        storage: Arc<dyn ArtifactStorage>,
        backoff: BackoffCalculator,
    ) -> Self {
        Self {
            client,
            storage,
            backoff,
        }
    }

    /// Poll `handle` until it reaches a final state.
    ///
    /// On success the result is fetched and saved into the results folder
    /// under `task_name`; the saved path is returned. Transport errors are
    /// retried with the same backoff until the budget runs out.
    pub async fn wait_for_result(&self, task_name: &str, handle: &str) -> GeoconvResult<PathBuf> {
        let started = Instant::now();
        sleep(self.backoff.initial_delay()).await;

        let mut attempt: u32 = 0;
        loop {
            if self.backoff.budget_exceeded(started.elapsed()) {
                warn!(handle = %handle, attempts = attempt, "Remote job exceeded polling budget");
                return Err(GeoconvError::Timeout(format!(
                    "remote job {handle} did not finish within {} minutes",
                    self.backoff.config().budget.as_secs() / 60
                )));
            }

            debug!(handle = %handle, attempt = attempt + 1, "Polling remote job");
            match self.client.poll(handle).await {
                Ok(status) => match status.state {
                    RemoteJobState::Success => {
                        let locator = status.result_locator.ok_or_else(|| {
                            RemoteError::InvalidResponse(
                                "successful job without output location".to_string(),
                            )
                        })?;
                        return self.store_result(task_name, &locator).await;
                    }
                    RemoteJobState::Failed => {
                        let message = status
                            .error
                            .unwrap_or_else(|| messages::REMOTE_FAILED_FALLBACK.to_string());
                        return Err(RemoteError::JobFailed(message).into());
                    }
                    RemoteJobState::Cancelled => return Err(RemoteError::JobCancelled.into()),
                    RemoteJobState::Pending => {}
                },
                Err(e) if e.is_retryable() => {
                    warn!(handle = %handle, error = %e, "Transient error while polling, will retry");
                }
                Err(e) => return Err(e.into()),
            }

            let delay = self.backoff.next_retry_delay(attempt);
            debug!(
                handle = %handle,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Remote job not finished yet"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn store_result(&self, task_name: &str, locator: &str) -> GeoconvResult<PathBuf> {
        let content = self.client.fetch(locator).await?;
        let path = self
            .storage
            .save(&content, task_name, ArtifactFolder::Results)
            .await?;
        info!(task_name = %task_name, file = %path.display(), "Remote result saved");
        Ok(path)
    }
}
