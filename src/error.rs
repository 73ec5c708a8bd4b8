//! # Error Types
//!
//! Crate-wide error enum plus the conversions that let each layer bubble up
//! with `?`. Layer-specific errors (state machine, remote client, storage,
//! hooks) live next to their modules and fold into [`GeoconvError`] here.

use thiserror::Error;

use crate::hooks::HookError;
use crate::remote::RemoteError;
use crate::state_machine::errors::StateMachineError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum GeoconvError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Processing hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GeoconvError {
    pub fn task_not_found(id: i64) -> Self {
        Self::NotFound { entity: "Task", id }
    }

    pub fn group_not_found(id: i64) -> Self {
        Self::NotFound { entity: "Group", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<config::ConfigError> for GeoconvError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type GeoconvResult<T> = std::result::Result<T, GeoconvError>;
