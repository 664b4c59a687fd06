//! Command-line interface
//!
//! Every transfer option can also come from the environment as
//! `INPUT_<NAME>`, which is how CI runners hand action inputs to a step.

use clap::{Parser, ValueEnum};
use remote_cache_core::config::parse_bool;
use remote_cache_core::{Direction, Inputs, Protocol};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "remote-cache")]
#[command(about = "Upload, download or delete a build cache on an FTP or SFTP server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file; command-line values take precedence
    #[arg(long, env = "INPUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote host name or address
    #[arg(long, env = "INPUT_HOST")]
    pub host: Option<String>,

    /// Remote port (default 21 for FTP, 22 for SFTP)
    #[arg(long, env = "INPUT_PORT")]
    pub port: Option<u16>,

    /// Login user
    #[arg(short, long, env = "INPUT_USER")]
    pub user: Option<String>,

    /// Login password
    #[arg(long, env = "INPUT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Use explicit FTPS (FTP only)
    #[arg(long, env = "INPUT_SECURE", value_parser = parse_flag)]
    pub secure: Option<bool>,

    /// Verify the server's TLS certificate
    #[arg(long, env = "INPUT_VERIFY-TLS", value_parser = parse_flag)]
    pub verify_tls: Option<bool>,

    /// Connection timeout in milliseconds, 0 disables it
    #[arg(long, env = "INPUT_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Protocol: ftp or sftp
    #[arg(long, visible_alias = "type", env = "INPUT_PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// upload, download or delete
    #[arg(long, visible_alias = "mode", env = "INPUT_DIRECTION")]
    pub direction: Option<Direction>,

    /// Legacy switch: true uploads, false downloads (used when no direction is given)
    #[arg(long, env = "INPUT_UPLOAD", value_parser = parse_flag)]
    pub upload: Option<bool>,

    /// Transfer the cache as a single .tgz archive
    #[arg(long, env = "INPUT_ARCHIVE", value_parser = parse_flag)]
    pub archive: Option<bool>,

    /// Archive base name, without the .tgz extension
    #[arg(long, env = "INPUT_ARCHIVE-NAME")]
    pub archive_name: Option<String>,

    /// Local directory (upload) or remote path (download, delete)
    #[arg(short, long, env = "INPUT_SOURCE")]
    pub source: Option<String>,

    /// Remote path (upload) or local directory (download)
    #[arg(short, long, env = "INPUT_DESTINATION")]
    pub destination: Option<String>,

    /// Local directory for the temporary upload archive
    #[arg(long, env = "INPUT_WORK-DIR")]
    pub work_dir: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, env = "INPUT_LOG-LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, env = "INPUT_LOG-FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Write logs to this file instead of stdout
    #[arg(long, env = "INPUT_LOG-FILE")]
    pub log_file: Option<PathBuf>,

    /// Debug logging, including the FTP control channel
    #[arg(short, long, env = "INPUT_VERBOSE", value_parser = parse_flag, num_args = 0..=1, default_missing_value = "true")]
    pub verbose: Option<bool>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    #[default]
    Text,
    /// One JSON object per line for log aggregators
    Json,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    parse_bool(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Transfer options given on the command line or in the environment
    pub fn inputs(&self) -> Inputs {
        Inputs {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            secure: self.secure,
            verify_tls: self.verify_tls,
            timeout: self.timeout,
            protocol: self.protocol,
            direction: self.direction,
            upload: self.upload,
            archive: self.archive,
            archive_name: self.archive_name.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            work_dir: self.work_dir.clone(),
        }
    }
}
