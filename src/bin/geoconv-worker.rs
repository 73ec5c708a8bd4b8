//! # Geoconv Worker
//!
//! Runs the conversion orchestrator, or flips the shared pause flag and
//! reports progress for an already running deployment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use geoconv_core::config::ConfigManager;
use geoconv_core::database::{DatabaseConnection, DatabaseMigrations};
use geoconv_core::logging;
use geoconv_core::models::{Group, GroupWithStatistics, TaskStatistics};
use geoconv_core::orchestration::OrchestrationSystem;
use geoconv_core::pause::{PauseGate, SqlPauseFlagStore};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "geoconv-worker")]
#[command(about = "Cadastral archive conversion worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment override (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start processing and run until interrupted
    Serve,

    /// Hold back new task attempts on every worker
    Pause,

    /// Let task attempts proceed again
    Resume,

    /// Flip the pause flag
    Toggle,

    /// Print pause state and task statistics as JSON
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "geoconv-worker failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_manager = match &cli.environment {
        Some(env) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), env),
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    match cli.command {
        Commands::Serve => serve(config_manager).await,
        Commands::Pause => {
            let gate = pause_gate(&config_manager).await?;
            gate.set_pause().await?;
            println!("paused");
            Ok(())
        }
        Commands::Resume => {
            let gate = pause_gate(&config_manager).await?;
            gate.unset_pause().await?;
            println!("running");
            Ok(())
        }
        Commands::Toggle => {
            let gate = pause_gate(&config_manager).await?;
            println!("{}", gate.toggle().await?);
            Ok(())
        }
        Commands::Status => status(&config_manager).await,
    }
}

async fn serve(config_manager: Arc<ConfigManager>) -> anyhow::Result<()> {
    let data_root = config_manager.config().storage.data_root.clone();
    logging::init_structured_logging_in(&logging::log_dir_for(&data_root));

    let system = OrchestrationSystem::bootstrap(config_manager)
        .await
        .context("failed to bootstrap orchestration system")?;
    info!("Worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    system.shutdown().await;
    Ok(())
}

async fn open_store(config_manager: &ConfigManager) -> anyhow::Result<DatabaseConnection> {
    for dir in config_manager.config().storage.required_dirs() {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let database = DatabaseConnection::connect(&config_manager.config().database)
        .await
        .context("failed to open database")?;
    DatabaseMigrations::run_all(database.pool()).await?;
    Ok(database)
}

async fn pause_gate(config_manager: &ConfigManager) -> anyhow::Result<PauseGate> {
    let database = open_store(config_manager).await?;
    let gate = PauseGate::with_interval(
        Arc::new(SqlPauseFlagStore::new(database.into_pool())),
        config_manager.config().pause.check_interval(),
    );
    gate.initialize().await?;
    Ok(gate)
}

async fn status(config_manager: &ConfigManager) -> anyhow::Result<()> {
    let database = open_store(config_manager).await?;
    let pool = database.pool().clone();

    let gate = PauseGate::new(Arc::new(SqlPauseFlagStore::new(pool.clone())));
    gate.initialize().await?;

    let statistics = TaskStatistics::global(&pool).await?;
    let mut by_group = TaskStatistics::by_group(&pool).await?;
    let groups: Vec<GroupWithStatistics> = Group::list_all(&pool)
        .await?
        .into_iter()
        .map(|group| {
            let stats = by_group.remove(&group.id).unwrap_or_default();
            GroupWithStatistics::new(group, stats)
        })
        .collect();

    let pause = gate.state().await?;
    let report = serde_json::json!({
        "environment": config_manager.environment(),
        "pause": pause,
        "statistics": statistics,
        "groups": groups,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    database.close().await;
    Ok(())
}
