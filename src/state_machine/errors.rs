use thiserror::Error;

/// Errors raised while validating or persisting task transitions
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper function to create an invalid transition error
pub fn invalid_transition(from: impl ToString, event: impl ToString) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: from.to_string(),
        event: event.to_string(),
    }
}

impl From<sqlx::Error> for StateMachineError {
    fn from(err: sqlx::Error) -> Self {
        StateMachineError::Persistence(PersistenceError::Database(err))
    }
}
