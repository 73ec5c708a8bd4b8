//! # Geoconv Configuration
//!
//! Layered configuration for the orchestration core. Values come from, in
//! increasing priority:
//!
//! 1. Built-in defaults ([`GeoconvConfig::default`])
//! 2. `config/geoconv.toml`
//! 3. `config/geoconv.{environment}.toml`
//! 4. Environment variables `GEOCONV__{SECTION}__{KEY}`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use geoconv_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_concurrent = manager.config().execution.max_concurrent_tasks;
//! # let _ = max_concurrent;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/geoconv.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoconvConfig {
    /// SQLite store settings
    pub database: DatabaseConfig,

    /// Staging and result folders
    pub storage: StorageConfig,

    /// Remote conversion service endpoints and credentials
    pub toolbox: ToolboxConfig,

    /// Status polling backoff
    pub polling: PollingConfig,

    /// Pause gate cadence
    pub pause: PauseConfig,

    /// Local execution limits
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/database/geoconv.db".to_string(),
            max_connections: 5,
            acquire_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which `uploaded/`, `results/`, `tmp/` and friends are created
    pub data_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn uploaded_dir(&self) -> PathBuf {
        self.data_root.join(constants::storage::UPLOADED_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_root.join(constants::storage::RESULTS_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_root.join(constants::storage::TMP_DIR)
    }

    /// Every folder the worker expects to exist at startup
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        [
            constants::storage::UPLOADED_DIR,
            constants::storage::RESULTS_DIR,
            constants::storage::DATABASE_DIR,
            constants::storage::LOGS_DIR,
            constants::storage::TMP_DIR,
        ]
        .iter()
        .map(|dir| self.data_root.join(dir))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolboxConfig {
    pub upload_url: String,
    pub execute_url: String,
    pub status_url: String,
    pub token: String,
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    /// First pause between request attempts, doubled after each failure
    pub retry_base_delay_ms: u64,
    /// The public Toolbox deployment serves a certificate chain that fails
    /// verification on some hosts.
    pub accept_invalid_certs: bool,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            execute_url: String::new(),
            status_url: String::new(),
            token: String::new(),
            request_timeout_seconds: constants::remote::REQUEST_TIMEOUT.as_secs(),
            max_attempts: constants::remote::MAX_ATTEMPTS,
            retry_base_delay_ms: 500,
            accept_invalid_certs: true,
        }
    }
}

impl ToolboxConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_jitter_max_ms: u64,
    pub step_ms: u64,
    pub retry_jitter_max_ms: u64,
    pub max_delay_ms: u64,
    pub budget_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_jitter_max_ms: millis(constants::polling::INITIAL_JITTER_MAX),
            step_ms: millis(constants::polling::STEP),
            retry_jitter_max_ms: millis(constants::polling::RETRY_JITTER_MAX),
            max_delay_ms: millis(constants::polling::MAX_DELAY),
            budget_seconds: constants::polling::BUDGET.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PauseConfig {
    pub check_interval_ms: u64,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: millis(constants::pause::CHECK_INTERVAL),
        }
    }
}

impl PauseConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrent_tasks: usize,
    /// Resume non-terminal tasks when the worker starts
    pub resume_on_startup: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            resume_on_startup: true,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl GeoconvConfig {
    /// Validate configuration values that would otherwise surface as
    /// confusing runtime failures
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "database configuration",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.execution.max_concurrent_tasks == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.max_concurrent_tasks",
                "0",
                "at least one task must be allowed to run",
            ));
        }

        if self.pause.check_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "pause.check_interval_ms",
                "0",
                "check interval must be greater than 0",
            ));
        }

        if self.polling.budget_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.budget_seconds",
                "0",
                "polling budget must be greater than 0",
            ));
        }

        if self.toolbox.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "toolbox.max_attempts",
                "0",
                "at least one request attempt is required",
            ));
        }

        Ok(())
    }

    /// Checks needed only when a live Toolbox client is built
    pub fn validate_toolbox(&self) -> ConfigResult<()> {
        let required = [
            ("toolbox.upload_url", &self.toolbox.upload_url),
            ("toolbox.execute_url", &self.toolbox.execute_url),
            ("toolbox.status_url", &self.toolbox.status_url),
            ("toolbox.token", &self.toolbox.token),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "toolbox configuration",
                ));
            }
        }

        Ok(())
    }
}
