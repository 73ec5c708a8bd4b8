//! # Processing Hooks
//!
//! Synchronous pre/post-processing steps applied to archives around the remote
//! conversion (coordinate-system fixes and similar). A hook may rewrite the
//! archive in place and either succeeds or returns a domain error that fails
//! the task. Hooks run on the blocking thread pool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::storage::archive;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{hook}: {message}")]
    Rejected { hook: &'static str, message: String },

    #[error("hook execution aborted: {0}")]
    Aborted(String),
}

impl HookError {
    pub fn rejected(hook: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            hook,
            message: message.into(),
        }
    }
}

pub trait ArtifactHook: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn apply(&self, archive: &Path) -> Result<(), HookError>;
}

/// Leaves the archive untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ArtifactHook for NoopHook {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn apply(&self, _archive: &Path) -> Result<(), HookError> {
        Ok(())
    }
}

/// Rejects files that are not readable, non-empty ZIP archives
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveIntegrityHook;

impl ArtifactHook for ArchiveIntegrityHook {
    fn name(&self) -> &'static str {
        "archive_integrity"
    }

    fn apply(&self, path: &Path) -> Result<(), HookError> {
        match archive::entry_count(path) {
            Ok(0) => Err(HookError::rejected(self.name(), "archive is empty")),
            Ok(_) => Ok(()),
            Err(e) => Err(HookError::rejected(self.name(), e.to_string())),
        }
    }
}

/// Run a hook on the blocking pool
pub async fn run_hook(hook: Arc<dyn ArtifactHook>, archive: PathBuf) -> Result<(), HookError> {
    tokio::task::spawn_blocking(move || hook.apply(&archive))
        .await
        .map_err(|e| HookError::Aborted(e.to_string()))?
}
