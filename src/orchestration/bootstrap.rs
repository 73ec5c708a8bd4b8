//! # Orchestration Bootstrap
//!
//! Wires a running system together from configuration: storage folders,
//! SQLite pool and schema, pause flag, Toolbox client, pipeline, dispatcher
//! and handler. Optionally resumes unfinished work once everything is up.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use super::backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
use super::dispatcher::LocalDispatcher;
use super::handler::OrchestrationHandler;
use super::pipeline::TaskPipeline;
use crate::config::ConfigManager;
use crate::database::{DatabaseConnection, DatabaseMigrations};
use crate::error::GeoconvResult;
use crate::hooks::{ArchiveIntegrityHook, NoopHook};
use crate::pause::{PauseGate, PauseState, SqlPauseFlagStore};
use crate::remote::{ConversionClient, ToolboxClient};
use crate::storage::{LocalArtifactStorage, StorageError};

/// Handle over a bootstrapped system
#[derive(Debug)]
pub struct OrchestrationSystem {
    config_manager: Arc<ConfigManager>,
    pool: SqlitePool,
    pause: PauseGate,
    dispatcher: Arc<LocalDispatcher>,
    handler: Arc<OrchestrationHandler>,
}

/// Point-in-time view of the running system
#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStatus {
    pub environment: String,
    pub pause: PauseState,
    pub in_flight: usize,
    pub database_pool_size: u32,
    pub database_pool_idle: usize,
}

impl OrchestrationSystem {
    /// Bring the whole system up against the real Toolbox service
    pub async fn bootstrap(config_manager: Arc<ConfigManager>) -> GeoconvResult<Self> {
        info!(
            environment = %config_manager.environment(),
            "BOOTSTRAP: Starting orchestration system"
        );
        let config = config_manager.config();

        for dir in config.storage.required_dirs() {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::io(dir.clone(), e))?;
        }

        let database = DatabaseConnection::connect(&config.database).await?;
        DatabaseMigrations::run_all(database.pool()).await?;
        info!("BOOTSTRAP: Database ready");

        config.validate_toolbox()?;
        let client: Arc<dyn ConversionClient> =
            Arc::new(ToolboxClient::new(config.toolbox.clone())?);

        Self::assemble(config_manager, database.into_pool(), client).await
    }

    /// Build the system over an existing pool and client.
    ///
    /// The pool must already carry the schema.
    pub async fn assemble(
        config_manager: Arc<ConfigManager>,
        pool: SqlitePool,
        client: Arc<dyn ConversionClient>,
    ) -> GeoconvResult<Self> {
        let config = config_manager.config();

        let pause = PauseGate::with_interval(
            Arc::new(SqlPauseFlagStore::new(pool.clone())),
            config.pause.check_interval(),
        );
        pause.initialize().await?;
        let pause_state = pause.state().await?;
        if pause_state == PauseState::Paused {
            warn!("BOOTSTRAP: Processing is paused, new work will wait");
        }

        let storage = Arc::new(LocalArtifactStorage::new(&config.storage));
        let backoff = BackoffCalculator::new(BackoffCalculatorConfig::from(&config.polling));

        let pipeline = Arc::new(TaskPipeline::new(
            pool.clone(),
            pause.clone(),
            client,
            storage.clone(),
            Arc::new(ArchiveIntegrityHook),
            Arc::new(NoopHook),
            backoff,
        ));
        let dispatcher = Arc::new(LocalDispatcher::new(
            pipeline,
            config.execution.max_concurrent_tasks,
        ));
        let handler = Arc::new(OrchestrationHandler::new(
            pool.clone(),
            storage,
            dispatcher.clone(),
            pause.clone(),
        ));

        if config.execution.resume_on_startup {
            let resumed = handler.restart_working_tasks().await?;
            info!(tasks = resumed.len(), "BOOTSTRAP: Startup recovery done");
        }

        info!(
            max_concurrent_tasks = config.execution.max_concurrent_tasks,
            pause = %pause_state,
            "BOOTSTRAP: Orchestration system ready"
        );

        Ok(Self {
            config_manager,
            pool,
            pause,
            dispatcher,
            handler,
        })
    }

    pub fn handler(&self) -> Arc<OrchestrationHandler> {
        self.handler.clone()
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.pause
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub async fn status(&self) -> GeoconvResult<SystemStatus> {
        Ok(SystemStatus {
            environment: self.config_manager.environment().to_string(),
            pause: self.pause.state().await?,
            in_flight: self.dispatcher.in_flight(),
            database_pool_size: self.pool.size(),
            database_pool_idle: self.pool.num_idle(),
        })
    }

    /// Stop running attempts and close the pool. Interrupted tasks stay
    /// non-terminal and are resumed on the next start.
    pub async fn shutdown(self) {
        info!(
            in_flight = self.dispatcher.in_flight(),
            "Shutting down orchestration system"
        );
        self.dispatcher.shutdown();
        self.pool.close().await;
    }
}
