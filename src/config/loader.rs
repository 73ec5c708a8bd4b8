//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Handles file
//! discovery, environment detection, source layering and validation.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::GeoconvConfig;

const CONFIG_BASENAME: &str = "geoconv";
const ENV_PREFIX: &str = "GEOCONV";

/// Legacy variable names still honored for the Toolbox endpoints
const LEGACY_TOOLBOX_VARS: [(&str, &str); 4] = [
    ("NGT_UPLOAD_URL", "upload_url"),
    ("NGT_EXECUTE_URL", "execute_url"),
    ("NGT_STATUS_URL", "status_url"),
    ("NGT_TOKEN", "token"),
];

/// Loaded configuration plus the context it was resolved in
#[derive(Debug)]
pub struct ConfigManager {
    config: GeoconvConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Lets tests pick an environment without touching process variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;
        Self::apply_legacy_toolbox_env(&mut config);

        config.validate()?;

        let sanitized = Self::sanitize_config_for_logging(&config);
        debug!(
            config = %serde_json::to_string(&sanitized)
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration resolved"
        );
        info!(
            environment = %environment,
            database_url = %config.database.url,
            max_concurrent_tasks = config.execution.max_concurrent_tasks,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Build a manager around an already constructed configuration
    pub fn from_config(config: GeoconvConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &GeoconvConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect the current environment from process variables
    pub fn detect_environment() -> String {
        env::var("GEOCONV_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<GeoconvConfig> {
        let defaults = Config::try_from(&GeoconvConfig::default())
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let base_file = config_directory.join(format!("{CONFIG_BASENAME}.toml"));
        let env_file = config_directory.join(format!("{CONFIG_BASENAME}.{environment}.toml"));

        Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(base_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(env_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    fn apply_legacy_toolbox_env(config: &mut GeoconvConfig) {
        for (var, field) in LEGACY_TOOLBOX_VARS {
            let Ok(value) = env::var(var) else {
                continue;
            };
            let target = match field {
                "upload_url" => &mut config.toolbox.upload_url,
                "execute_url" => &mut config.toolbox.execute_url,
                "status_url" => &mut config.toolbox.status_url,
                _ => &mut config.toolbox.token,
            };
            if target.is_empty() {
                debug!(variable = var, "Using legacy toolbox variable");
                *target = value;
            }
        }
    }

    fn sanitize_config_for_logging(config: &GeoconvConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential", "auth"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = match val {
                            serde_json::Value::String(s) if s.is_empty() => {
                                serde_json::Value::String("[EMPTY]".to_string())
                            }
                            _ => serde_json::Value::String("[MASKED]".to_string()),
                        };
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
