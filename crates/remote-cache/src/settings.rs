//! Configuration file and the merged run settings
//!
//! ```toml
//! [transfer]
//! protocol = "sftp"
//! host = "cache.example.com"
//! user = "ci"
//! direction = "upload"
//! archive = true
//! archive-name = "node_modules"
//! source = "./node_modules"
//! destination = "/cache/my-app"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! file = "/var/log/remote-cache.json"
//! ```

use crate::cli::{Cli, LogFormat};
use anyhow::{Context, Result};
use remote_cache_core::{Inputs, TransferConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of the `--config` file
#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// `[transfer]` table
    pub transfer: Inputs,
    /// `[logging]` table
    pub logging: LoggingConfig,
}

/// `[logging]` table of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: Option<String>,
    /// Output format
    pub format: Option<LogFormat>,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

/// Read and parse a TOML configuration file
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse configuration file {}", path.display()))
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Log level or filter directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

/// Everything one run needs, before validation of the transfer inputs
pub struct Settings {
    /// Merged transfer inputs
    pub inputs: Inputs,
    /// Logging options
    pub logging: LogSettings,
}

impl Settings {
    /// Layer the command line over the optional configuration file
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_config(path)?,
            None => FileConfig::default(),
        };

        let level = if cli.verbose.unwrap_or(false) {
            "debug".to_string()
        } else {
            cli.log_level
                .clone()
                .or(file.logging.level)
                .unwrap_or_else(|| "info".to_string())
        };

        Ok(Self {
            inputs: file.transfer.overlay(cli.inputs()),
            logging: LogSettings {
                level,
                format: cli.log_format.or(file.logging.format).unwrap_or_default(),
                file: cli.log_file.clone().or(file.logging.file),
            },
        })
    }

    /// Validate the merged transfer inputs
    pub fn transfer_config(&self) -> Result<TransferConfig> {
        self.inputs
            .clone()
            .into_config()
            .context("Invalid transfer configuration")
    }
}
