// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::{Context, Result};
use clap::Subcommand;
use dispatch_core::config::{Config, ConfigLoader};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default configuration file to the standard location.
    Init {
        /// Overwrite an existing file instead of erroring.
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration (defaults + file + environment).
    Show {
        /// Load from this file instead of the standard location.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a configuration file without starting anything.
    Validate {
        /// Path to config file (default: the standard location).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub async fn execute(cmd: ConfigCommands, verbose: bool) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => init_config(force, verbose).await,
        ConfigCommands::Show { config } => show_config(config, verbose).await,
        ConfigCommands::Validate { config } => validate_config(config, verbose).await,
    }
}

async fn init_config(force: bool, verbose: bool) -> Result<()> {
    let path = ConfigLoader::default_config_path().context("could not determine config directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "configuration file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    if path.exists() {
        std::fs::remove_file(&path).context("failed to remove existing configuration file")?;
    }

    let written = dispatch_core::config::init_config_file()?;
    println!("Configuration written to: {}", written.display());
    if verbose {
        let content = std::fs::read_to_string(&written)?;
        println!("\n{content}");
    }
    Ok(())
}

async fn show_config(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_file(path);
    }
    let config = loader.load().context("failed to load configuration")?;

    println!("Resource Controller:");
    println!("  bind_addr: {}", config.rc.bind_addr);
    println!("  hosts_path: {}", config.rc.hosts_path);
    println!("\nCoordinator:");
    println!("  bind_addr: {}", config.coordinator.bind_addr);
    println!("  rc_url: {}", config.coordinator.rc_url);
    println!("  priority: {}", config.coordinator.priority);
    println!("\nProcessor:");
    println!("  coordinator_url: {}", config.processor.coordinator_url);
    println!("  overload_max: {}", config.processor.overload_max);

    if verbose {
        println!("\nFull configuration:\n{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}

async fn validate_config(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let path = config_path
        .or_else(ConfigLoader::default_config_path)
        .context("could not determine config path")?;

    if !path.exists() {
        anyhow::bail!("configuration file not found: {}", path.display());
    }

    let loader = ConfigLoader::new().with_file(&path).skip_env();
    let config: Config = loader.load().context("configuration is invalid")?;

    println!("Configuration file is valid: {}", path.display());
    if verbose {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_missing_file_errors() {
        let result = validate_config(Some(PathBuf::from("/nonexistent/config.toml")), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_show_config_defaults() {
        let result = show_config(None, false).await;
        assert!(result.is_ok());
    }
}
