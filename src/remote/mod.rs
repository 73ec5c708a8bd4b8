//! # External Conversion Client
//!
//! Contract with the remote service that performs the actual conversion:
//! submit an archive, poll the job, fetch the result. [`ToolboxClient`] speaks
//! the NextGIS Toolbox HTTP API; tests substitute scripted implementations.

pub mod toolbox;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ConversionOptions;

pub use toolbox::ToolboxClient;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure, timeout, or server-side 5xx. Worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    JobFailed(String),

    #[error("{}", crate::constants::messages::REMOTE_CANCELLED)]
    JobCancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("cannot read source archive '{path}': {reason}")]
    Source { path: String, reason: String },

    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Coarse state of a remote job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobState {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl RemoteJobState {
    /// Map the service's state string. Anything not final counts as pending.
    pub fn from_remote(state: &str) -> Self {
        match state {
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub state: RemoteJobState,
    /// Where to fetch the result from, set on success
    pub result_locator: Option<String>,
    pub error: Option<String>,
}

impl RemoteJobStatus {
    pub fn pending() -> Self {
        Self {
            state: RemoteJobState::Pending,
            result_locator: None,
            error: None,
        }
    }

    pub fn success(locator: impl Into<String>) -> Self {
        Self {
            state: RemoteJobState::Success,
            result_locator: Some(locator.into()),
            error: None,
        }
    }

    pub fn failed(error: Option<String>) -> Self {
        Self {
            state: RemoteJobState::Failed,
            result_locator: None,
            error,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: RemoteJobState::Cancelled,
            result_locator: None,
            error: None,
        }
    }
}

#[async_trait]
pub trait ConversionClient: Send + Sync + fmt::Debug {
    /// Upload the archive and start a conversion job. Returns the job handle.
    async fn submit(
        &self,
        source: &Path,
        identifier: &str,
        options: &ConversionOptions,
    ) -> RemoteResult<String>;

    async fn poll(&self, handle: &str) -> RemoteResult<RemoteJobStatus>;

    async fn fetch(&self, locator: &str) -> RemoteResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(RemoteJobState::from_remote("SUCCESS"), RemoteJobState::Success);
        assert_eq!(RemoteJobState::from_remote("FAILED"), RemoteJobState::Failed);
        assert_eq!(RemoteJobState::from_remote("CANCELLED"), RemoteJobState::Cancelled);
        assert_eq!(RemoteJobState::from_remote("STARTED"), RemoteJobState::Pending);
        assert_eq!(RemoteJobState::from_remote("PENDING"), RemoteJobState::Pending);
    }

    #[test]
    fn test_only_transport_errors_retry() {
        assert!(RemoteError::Transport("timeout".into()).is_retryable());
        assert!(!RemoteError::JobCancelled.is_retryable());
        assert!(!RemoteError::Rejected {
            status: 404,
            body: "not found".into()
        }
        .is_retryable());
        assert_eq!(
            RemoteError::JobCancelled.to_string(),
            "remote conversion was cancelled"
        );
    }
}
