use serde::{Deserialize, Serialize};

/// Events that drive task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Worker picked the task up and starts pre-processing
    Start,
    /// Archive submitted, the remote service returned a job handle
    Submitted { handle: String },
    /// Existing remote job is picked up again without resubmitting
    Resume,
    /// Remote result fetched and saved locally
    ResultReady,
    /// Post-processing finished, result artifact is final
    Complete { result_path: String },
    /// Attempt failed with an error message
    Fail(String),
    /// Operator restart, back to the initial state
    Restart,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Submitted { .. } => "submitted",
            Self::Resume => "resume",
            Self::ResultReady => "result_ready",
            Self::Complete { .. } => "complete",
            Self::Fail(_) => "fail",
            Self::Restart => "restart",
        }
    }
}
