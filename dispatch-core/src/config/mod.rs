// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management for dispatch.
//!
//! This module provides a hierarchical configuration system with the
//! following precedence (highest wins):
//!
//! 1. Environment variables (prefixed with `DISPATCH_`)
//! 2. Config file (`~/.config/dispatch/config.toml`, or an explicit path)
//! 3. Defaults (lowest priority)
//!
//! # Examples
//!
//! ```no_run
//! use dispatch_core::config::ConfigLoader;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! println!("RC bind addr: {}", config.rc.bind_addr);
//! # Ok(())
//! # }
//! ```

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::path::{Path, PathBuf};

pub use models::{Config, CoordinatorSettings, ProcessorSettings, RcConfig, StorageConfig};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "dispatch";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "DISPATCH";

/// Environment variable separator for nested configuration.
/// Example: `DISPATCH_COORDINATOR__PRIORITY`.
const ENV_SEPARATOR: &str = "__";

/// Configuration loader with builder pattern.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this file instead of the default config file location.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip loading from the default configuration file.
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip loading from environment variables.
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load the configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file can't be parsed, an environment
    /// variable has an invalid value, or the resulting configuration fails
    /// validation.
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Config::default();
        let defaults_value = config_to_value(&defaults)?;
        builder = builder.add_source(config::Config::try_from(&defaults_value)?);

        if !self.skip_default_file {
            if let Some(config_path) = self.find_config_file() {
                tracing::debug!("loading config from {}", config_path.display());
                builder = builder.add_source(
                    File::from(config_path)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            } else {
                tracing::debug!("no default config file found");
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!("loading custom config from {}", custom_path.display());
            builder = builder.add_source(
                File::from(custom_path.as_ref())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        if !self.skip_env {
            tracing::debug!("loading config from environment variables");
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let built = builder.build().context("failed to build configuration")?;
        let config: Config = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        validate(&config).context("configuration validation failed")?;

        tracing::info!("configuration loaded successfully");
        Ok(config)
    }

    /// Find the default configuration file.
    ///
    /// Searches the platform config directory first, then the current
    /// directory.
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// Get the default configuration directory path.
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }
}

fn config_to_value(config: &Config) -> Result<serde_json::Value, ConfigError> {
    serde_json::to_value(config).map_err(|e| ConfigError::Foreign(Box::new(e)))
}

/// Hand-rolled validation (no `serde_valid` dependency): every field here
/// is a runtime tunable, not a schema-checked document, so plain range
/// checks are enough.
fn validate(config: &Config) -> Result<()> {
    if config.coordinator.priority < 0.0 {
        anyhow::bail!("coordinator.priority must be non-negative");
    }
    if config.processor.overload_max == 0 {
        anyhow::bail!("processor.overload_max must be at least 1");
    }
    if config.processor.max_errors_in_a_row == 0 {
        anyhow::bail!("processor.max_errors_in_a_row must be at least 1");
    }
    Ok(())
}

/// Initialize a default configuration file at the standard location.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined or
/// created, the file already exists, or it cannot be written.
pub fn init_config_file() -> Result<PathBuf> {
    let config_dir =
        ConfigLoader::default_config_dir().context("could not determine config directory")?;

    std::fs::create_dir_all(&config_dir).context("failed to create config directory")?;

    let config_path = config_dir.join(CONFIG_FILE_NAME);

    if config_path.exists() {
        anyhow::bail!("config file already exists at {}", config_path.display());
    }

    let default_config = Config::default();
    let toml_content =
        toml::to_string_pretty(&default_config).context("failed to serialize default config")?;

    std::fs::write(&config_path, toml_content).context("failed to write config file")?;

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let loader = ConfigLoader::new().skip_default_file().skip_env();
        let config = loader.load().expect("failed to load default config");

        assert_eq!(config.rc.bind_addr, "0.0.0.0:9753");
        assert_eq!(config.coordinator.priority, 1.0);
    }

    #[test]
    fn test_load_from_custom_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let custom_config = r#"
[rc]
bind_addr = "0.0.0.0:7000"

[coordinator]
priority = 4.0
max_clients = 10
        "#;

        std::fs::write(&config_path, custom_config).unwrap();

        let loader = ConfigLoader::new().with_file(&config_path).skip_env();
        let config = loader.load().expect("failed to load custom config");

        assert_eq!(config.rc.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.coordinator.priority, 4.0);
        assert_eq!(config.coordinator.max_clients, Some(10));
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("DISPATCH_COORDINATOR__PRIORITY", "7.5");

        let loader = ConfigLoader::new().skip_default_file();
        let config = loader.load().expect("failed to load config with env vars");

        assert_eq!(config.coordinator.priority, 7.5);

        env::remove_var("DISPATCH_COORDINATOR__PRIORITY");
    }

    #[test]
    fn test_precedence_env_over_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        std::fs::write(&config_path, "[coordinator]\npriority = 2.0\n").unwrap();

        env::set_var("DISPATCH_COORDINATOR__PRIORITY", "9.0");

        let loader = ConfigLoader::new().with_file(&config_path);
        let config = loader.load().expect("failed to load config");

        assert_eq!(config.coordinator.priority, 9.0);

        env::remove_var("DISPATCH_COORDINATOR__PRIORITY");
    }

    #[test]
    fn test_validation_failure_negative_priority() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid_config.toml");

        std::fs::write(&config_path, "[coordinator]\npriority = -1.0\n").unwrap();

        let loader = ConfigLoader::new().with_file(&config_path).skip_env();
        let result = loader.load();

        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_dir() {
        let config_dir = ConfigLoader::default_config_dir();
        assert!(config_dir.is_some());

        if let Some(dir) = config_dir {
            assert!(dir.to_string_lossy().contains("dispatch"));
        }
    }
}
