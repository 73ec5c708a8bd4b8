//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and to a JSON log file,
//! so a single task's lifecycle can be followed across concurrent runs by its
//! `task_id` and `execution_token` fields.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging into `./log`
pub fn init_structured_logging() {
    init_structured_logging_in(Path::new("log"));
}

/// Initialize structured logging with an explicit log directory.
///
/// Idempotent. If a global subscriber is already installed, the existing one
/// is kept. If the directory cannot be created, only console output is set up.
pub fn init_structured_logging_in(log_dir: &Path) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(log_level));

        let file_target = match fs::create_dir_all(log_dir) {
            Ok(()) => {
                let pid = process::id();
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                let file_name = format!("{environment}.{pid}.{timestamp}.log");
                let appender = tracing_appender::rolling::never(log_dir, &file_name);
                Some((tracing_appender::non_blocking(appender), log_dir.join(file_name)))
            }
            Err(_) => None,
        };

        let (file_layer, guard, log_path) = match file_target {
            Some(((writer, guard), path)) => {
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(log_level));
                (Some(layer), Some(guard), Some(path))
            }
            None => (None, None, None),
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized, keeping it");
        }

        let log_file = log_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = %log_file,
            "Structured logging initialized"
        );

        // The writer must outlive every span emitted by the process
        if let Some(guard) = guard {
            std::mem::forget(guard);
        }
    });
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("GEOCONV_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
pub fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Default log directory for a data root
pub fn log_dir_for(data_root: &Path) -> PathBuf {
    data_root.join(crate::constants::storage::LOGS_DIR)
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: Option<i64>,
    group_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = task_id,
        group_id = group_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
