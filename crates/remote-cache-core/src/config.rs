//! Invocation configuration
//!
//! The pipeline supplies a flat set of key-value [`Inputs`] (command line,
//! environment or a TOML file). They are validated once into an immutable
//! [`TransferConfig`], which is the only configuration the orchestrator sees.

use crate::transport::ConnectParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Extension appended to the archive name for both the local and remote file
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Remote file-transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    /// FTP, optionally upgraded to explicit TLS
    Ftp,
    /// SFTP over SSH
    Sftp,
}

impl Protocol {
    /// Well-known port used when none is configured
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }

    /// Lower-case name used in configuration and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(Error::config(format!(
                "Invalid protocol '{}'. Valid values: ftp, sftp",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        protocol.as_str().to_string()
    }
}

/// Which way the cache moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Direction {
    /// Local source to remote destination
    Upload,
    /// Remote source to local destination
    Download,
    /// Remove the remote source
    Delete,
}

impl Direction {
    /// Lower-case name used in configuration and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
            Direction::Delete => "delete",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(Direction::Upload),
            "download" => Ok(Direction::Download),
            "delete" => Ok(Direction::Delete),
            other => Err(Error::config(format!(
                "Invalid direction '{}'. Valid values: upload, download, delete",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Direction> for String {
    fn from(direction: Direction) -> Self {
        direction.as_str().to_string()
    }
}

/// Parse a boolean-as-string input.
///
/// An empty value is `false`, matching an unset pipeline input.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        other => Err(Error::config(format!("Invalid boolean value '{}'", other))),
    }
}

/// Raw, unvalidated inputs
///
/// Every field is optional so that several sources can be layered with
/// [`Inputs::overlay`] before validation.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Inputs {
    /// Remote host name or address
    pub host: Option<String>,
    /// Remote port, protocol default when unset
    pub port: Option<u16>,
    /// Login user
    pub user: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Use explicit FTPS for FTP connections
    pub secure: Option<bool>,
    /// Verify the server certificate, on by default
    pub verify_tls: Option<bool>,
    /// Connection timeout in milliseconds, zero disables it
    pub timeout: Option<u64>,
    /// Transfer protocol
    #[serde(alias = "type")]
    pub protocol: Option<Protocol>,
    /// What to do with the cache
    #[serde(alias = "mode")]
    pub direction: Option<Direction>,
    /// Legacy switch used when no direction is given
    pub upload: Option<bool>,
    /// Move a single `.tgz` instead of a directory tree
    pub archive: Option<bool>,
    /// Archive base name, without the `.tgz` extension
    pub archive_name: Option<String>,
    /// Local or remote source, depending on the direction
    pub source: Option<String>,
    /// Local or remote destination, depending on the direction
    pub destination: Option<String>,
    /// Directory in which upload archives are staged
    pub work_dir: Option<PathBuf>,
}

impl Inputs {
    /// Layer `other` on top of `self`; values present in `other` win.
    pub fn overlay(self, other: Inputs) -> Inputs {
        Inputs {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            secure: other.secure.or(self.secure),
            verify_tls: other.verify_tls.or(self.verify_tls),
            timeout: other.timeout.or(self.timeout),
            protocol: other.protocol.or(self.protocol),
            direction: other.direction.or(self.direction),
            upload: other.upload.or(self.upload),
            archive: other.archive.or(self.archive),
            archive_name: other.archive_name.or(self.archive_name),
            source: other.source.or(self.source),
            destination: other.destination.or(self.destination),
            work_dir: other.work_dir.or(self.work_dir),
        }
    }

    /// Build and validate the invocation configuration
    pub fn into_config(self) -> Result<TransferConfig> {
        let protocol = self.protocol.unwrap_or(Protocol::Ftp);

        let direction = match (self.direction, self.upload) {
            (Some(direction), _) => direction,
            (None, Some(true)) => Direction::Upload,
            (None, Some(false)) => Direction::Download,
            (None, None) => {
                return Err(Error::config(
                    "Missing required input: direction (upload, download or delete)",
                ));
            }
        };

        let host = non_empty(self.host).ok_or_else(|| Error::config("Missing required input: host"))?;

        // Anonymous login is only meaningful for FTP
        let (user, password) = match protocol {
            Protocol::Ftp => (
                non_empty(self.user).unwrap_or_else(|| "anonymous".to_string()),
                self.password.unwrap_or_else(|| "guest".to_string()),
            ),
            Protocol::Sftp => (
                non_empty(self.user)
                    .ok_or_else(|| Error::config("Missing required input: user"))?,
                self.password.unwrap_or_default(),
            ),
        };

        let timeout_ms = self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS);

        let config = TransferConfig {
            protocol,
            direction,
            archive: self.archive.unwrap_or(false),
            archive_name: self.archive_name.unwrap_or_default().trim().to_string(),
            source: self.source.unwrap_or_default(),
            destination: self.destination.unwrap_or_default(),
            connection: ConnectParams {
                host,
                port: self.port,
                user,
                password,
                secure: self.secure.unwrap_or(false),
                verify_tls: self.verify_tls.unwrap_or(true),
                timeout: Duration::from_millis(timeout_ms),
            },
            work_dir: self.work_dir.unwrap_or_else(|| PathBuf::from(".")),
        };

        config.validate()?;
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validated configuration for one invocation
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Transfer protocol
    pub protocol: Protocol,
    /// What to do with the cache
    pub direction: Direction,
    /// Archive mode
    pub archive: bool,
    /// Archive base name; the file is always `<archive_name>.tgz`
    pub archive_name: String,
    /// Local or remote source
    pub source: String,
    /// Local or remote destination, empty for deletes
    pub destination: String,
    /// Session parameters
    pub connection: ConnectParams,
    /// Local directory in which an upload archive is staged
    pub work_dir: PathBuf,
}

impl TransferConfig {
    /// Check every invariant that can be verified without the network
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }

        if self.archive {
            if self.archive_name.trim().is_empty() {
                return Err(Error::config(
                    "archive-name is required when archive is enabled",
                ));
            }
            if self.archive_name.contains(['/', '\\']) {
                return Err(Error::config(format!(
                    "archive-name must be a plain file name, got '{}'",
                    self.archive_name
                )));
            }
        }

        if self.source.trim().is_empty() {
            return Err(Error::config("source must not be empty"));
        }

        // Delete never reads the destination
        if self.direction != Direction::Delete && self.destination.trim().is_empty() {
            return Err(Error::config("destination must not be empty"));
        }

        Ok(())
    }

    /// File name of the archive, e.g. `cache.tgz`
    pub fn archive_file_name(&self) -> String {
        format!("{}.{}", self.archive_name, ARCHIVE_EXTENSION)
    }
}
