//! # Orchestration
//!
//! Everything that moves tasks forward:
//!
//! - [`pipeline`]: one execution attempt of one task, token-guarded
//! - [`poller`] and [`backoff_calculator`]: waiting on the remote job
//! - [`dispatcher`]: running attempts concurrently and revoking them
//! - [`handler`]: batch operations exposed to the outer layers
//! - [`bootstrap`]: wiring it all together from configuration

pub mod backoff_calculator;
pub mod bootstrap;
pub mod dispatcher;
pub mod handler;
pub mod pipeline;
pub mod poller;

pub use backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
pub use bootstrap::{OrchestrationSystem, SystemStatus};
pub use dispatcher::{LocalDispatcher, TaskDispatcher};
pub use handler::{CreateTasksRequest, CreatedTasks, OrchestrationHandler};
pub use pipeline::{RunOutcome, TaskPipeline, TaskRun};
pub use poller::RemoteJobPoller;
