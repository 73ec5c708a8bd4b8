//! # System Constants
//!
//! Operational boundaries of the conversion pipeline: polling cadence, request
//! limits, storage folder names and the remote operation identifiers.

use std::time::Duration;

pub use crate::state_machine::TaskState as TaskStatus;

/// Remote polling defaults.
pub mod polling {
    use super::Duration;

    /// Upper bound of the random delay before the first status poll.
    pub const INITIAL_JITTER_MAX: Duration = Duration::from_secs(3);
    /// Linear backoff increment per attempt.
    pub const STEP: Duration = Duration::from_secs(2);
    /// Upper bound of the random jitter added to every retry delay.
    pub const RETRY_JITTER_MAX: Duration = Duration::from_secs(10);
    /// Ceiling of a single retry delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(300);
    /// Wall-clock budget for waiting on one remote job.
    pub const BUDGET: Duration = Duration::from_secs(90 * 60);
}

/// Pause gate defaults.
pub mod pause {
    use super::Duration;

    pub const FLAG_KEY: &str = "pause";
    pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);
}

/// Remote conversion service request contract.
pub mod remote {
    use super::Duration;

    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const IMPORT_OPERATION: &str = "import_egrn";
    pub const USER_AGENT: &str = concat!("geoconv-core-rs/", env!("CARGO_PKG_VERSION"));
}

/// Storage folder layout under the data root.
pub mod storage {
    pub const UPLOADED_DIR: &str = "uploaded";
    pub const RESULTS_DIR: &str = "results";
    pub const DATABASE_DIR: &str = "database";
    pub const LOGS_DIR: &str = "logs";
    pub const TMP_DIR: &str = "tmp";
    pub const ARCHIVE_EXTENSION: &str = "zip";
}

/// Error messages persisted on failed tasks.
pub mod messages {
    pub const REMOTE_FAILED_FALLBACK: &str = "remote conversion failed without details";
    pub const REMOTE_CANCELLED: &str = "remote conversion was cancelled";
    pub const NOTHING_TO_PROCESS: &str = "all submitted files have already been processed";
    pub const NO_ARCHIVES: &str = "no zip archives among the submitted files";
}
