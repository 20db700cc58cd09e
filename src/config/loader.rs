//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered lowest to highest precedence:
//!
//! 1. `<dir>/collector-config.{yaml,yml,toml,json}` (required)
//! 2. `<dir>/collector-config.<environment>.*` (optional overlay)
//! 3. `COLLECTOR__<SECTION>__<KEY>` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::CollectorConfig;
use crate::constants::config::{
    CONFIG_FILE_STEM, DEFAULT_CONFIG_DIRECTORY, DEFAULT_ENVIRONMENT, ENV_OVERRIDE_PREFIX,
    ENV_OVERRIDE_SEPARATOR,
};
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const SUPPORTED_EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

#[derive(Debug)]
pub struct ConfigManager {
    config: CollectorConfig,
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
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading collector configuration"
        );

        let base_file = Self::locate_base_file(&config_directory)?;
        let overlay_stem = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}"));

        let layered = Config::builder()
            .add_source(File::from(base_file.as_path()))
            .add_source(File::from(overlay_stem.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .prefix_separator(ENV_OVERRIDE_SEPARATOR)
                    .separator(ENV_OVERRIDE_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(config_directory.display().to_string(), e)
            })?;

        let config: CollectorConfig = layered.try_deserialize().map_err(|e| {
            ConfigurationError::load_error(base_file.display().to_string(), e)
        })?;

        let manager = Self::from_config(config, environment)?;
        info!(
            environment = %environment,
            sources = manager.config.sources.len(),
            global_pool_size = manager.config.execution.global_pool_size,
            "✅ CONFIG: Collector configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config_directory,
            ..manager
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: CollectorConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from(DEFAULT_CONFIG_DIRECTORY),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("COLLECTOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("COLLECTOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIRECTORY))
    }

    fn locate_base_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let candidates: Vec<PathBuf> = SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| config_directory.join(format!("{CONFIG_FILE_STEM}.{ext}")))
            .collect();

        match candidates.iter().find(|path| path.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(ConfigurationError::config_file_not_found(candidates)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASE: &str = r#"
sources:
  weather:
    rate_per_second: 2.0
    burst_capacity: 4
    max_concurrent: 2
execution:
  global_pool_size: 8
  max_retries: 2
"#;

    #[test]
    fn test_missing_directory_reports_searched_paths() {
        let dir = TempDir::new().unwrap();
        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        match err {
            ConfigurationError::ConfigFileNotFound { searched_paths } => {
                assert_eq!(searched_paths.len(), SUPPORTED_EXTENSIONS.len());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_base_file_with_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("collector-config.yaml"), BASE).unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        let config = manager.config();
        assert_eq!(manager.environment(), "test");
        assert_eq!(config.execution.global_pool_size, 8);
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.sources["weather"].burst_capacity, 4);
        assert_eq!(config.queue.max_capacity, 10_000);
    }

    #[test]
    fn test_environment_overlay_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("collector-config.yaml"), BASE).unwrap();
        fs::write(
            dir.path().join("collector-config.production.yaml"),
            "execution:\n  global_pool_size: 64\n",
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        assert_eq!(manager.config().execution.global_pool_size, 64);
        assert_eq!(manager.config().execution.max_retries, 2);
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("collector-config.yaml"),
            "sources:\n  weather:\n    rate_per_second: 0.0\n    burst_capacity: 1\n    max_concurrent: 1\n",
        )
        .unwrap();

        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
