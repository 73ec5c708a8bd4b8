#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Geoconv Core
//!
//! Task orchestration core for converting cadastral extract archives into
//! GIS formats through the NextGIS Toolbox service.
//!
//! ## Overview
//!
//! A user submits a batch of ZIP archives. Each archive becomes a task inside
//! one group; each task is uploaded to the remote service, polled until the
//! conversion finishes, and its result is stored locally for download.
//! Progress is tracked per task in SQLite and aggregated per group.
//!
//! ## Architecture
//!
//! - Tasks move through `accepted → parsing → converting → postprocessing →
//!   completed`, or end up `failed` with an error message.
//! - Every execution attempt owns an execution token. Restarting or deleting
//!   a task replaces the token, and any status write from the old attempt is
//!   silently ignored.
//! - A shared pause flag holds back new attempts across all worker processes.
//! - On startup every unfinished task is resumed; tasks that already have a
//!   remote job keep polling it instead of resubmitting.
//!
//! ## Module Organization
//!
//! - [`models`] - Task, group, conversion options and statistics
//! - [`database`] - Pool setup and embedded migrations
//! - [`state_machine`] - Task states, events and token-guarded transitions
//! - [`orchestration`] - Pipeline, dispatcher, handler and bootstrap
//! - [`remote`] - Conversion service client
//! - [`storage`] - Upload staging, results and bundles
//! - [`pause`] - Shared pause gate
//! - [`hooks`] - Pre/post-processing hooks
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geoconv_core::config::ConfigManager;
//! use geoconv_core::orchestration::{CreateTasksRequest, OrchestrationSystem};
//! use geoconv_core::storage::UploadedFile;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config_manager = ConfigManager::load()?;
//! let system = OrchestrationSystem::bootstrap(config_manager).await?;
//!
//! let created = system
//!     .handler()
//!     .create_tasks(CreateTasksRequest {
//!         files: vec![UploadedFile::new("extract.zip", std::fs::read("extract.zip")?)],
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("group {} with tasks {:?}", created.group_id, created.task_ids);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod pause;
pub mod remote;
pub mod state_machine;
pub mod storage;

pub use config::{ConfigManager, GeoconvConfig};
pub use constants::TaskStatus;
pub use error::{GeoconvError, GeoconvResult};
pub use models::{ConversionOptions, Group, GroupWithStatistics, OutputFormat, Task, TaskStatistics};
pub use orchestration::{
    CreateTasksRequest, CreatedTasks, OrchestrationHandler, OrchestrationSystem, TaskRun,
};
pub use pause::{PauseGate, PauseState};
pub use state_machine::{TaskEvent, TaskState};
