//! # Data Models
//!
//! Persistent entities of the orchestration core and their queries. Every
//! query function takes a generic SQLite executor, so the same call works on a
//! pool for standalone reads and on `&mut *tx` inside a handler transaction.
//!
//! - [`Group`] - one submitted batch, owner of its tasks
//! - [`Task`] - one archive moving through the conversion lifecycle
//! - [`TaskPatch`] - typed partial update, optionally token-guarded
//! - [`TaskStatistics`] - derived progress counters
//! - [`ConversionOptions`] - parameters snapshotted at creation

pub mod group;
pub mod options;
pub mod statistics;
pub mod task;

pub use group::{Group, GroupWithStatistics};
pub use options::{ConversionOptions, OutputFormat};
pub use statistics::TaskStatistics;
pub use task::{new_execution_token, NewTask, Task, TaskPatch, WriteOutcome};
