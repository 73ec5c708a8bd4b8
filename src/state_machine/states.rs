use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single conversion task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskState {
    /// Created or restarted, waiting for a worker to pick it up
    Accepted,
    /// Pre-processing the staged archive and submitting it remotely
    Parsing,
    /// Remote job submitted, waiting on its result
    Converting,
    /// Result fetched, running local post-processing
    Postprocessing,
    /// Result artifact available
    Completed,
    /// Attempt ended with an error
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Accepted,
        Self::Parsing,
        Self::Converting,
        Self::Postprocessing,
        Self::Completed,
        Self::Failed,
    ];

    /// Check if this is a terminal state (only an explicit restart leaves it)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Check if a pipeline is actively working on the task
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Parsing | Self::Converting | Self::Postprocessing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Parsing => "parsing",
            Self::Converting => "converting",
            Self::Postprocessing => "postprocessing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "parsing" => Ok(Self::Parsing),
            "converting" => Ok(Self::Converting),
            "postprocessing" => Ok(Self::Postprocessing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Default state for new tasks
impl Default for TaskState {
    fn default() -> Self {
        Self::Accepted
    }
}
