//! Error types for cache transfers
//!
//! Every failure of an invocation maps onto one of five categories:
//! configuration, connection, archive creation, archive extraction and
//! remote transport. Messages always carry the failing path and the
//! underlying cause so an operator can diagnose a failed pipeline step
//! without re-running it.

use std::fmt;
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for transport adapter operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Invocation error
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing input, detected before any network action
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote session could not be established
    #[error("Failed to connect to {host}: {cause}")]
    Connect { host: String, cause: String },

    /// Local archive could not be produced
    #[error("Failed to create archive {path}: {cause}")]
    ArchiveCreate { path: String, cause: String },

    /// Local archive could not be read or unpacked
    #[error("Failed to extract archive {path}: {cause}")]
    ArchiveExtract { path: String, cause: String },

    /// Remote operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local filesystem step outside the archive codec failed
    #[error("Local I/O error on {path}: {cause}")]
    LocalIo { path: String, cause: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a connection error
    pub fn connect(host: impl Into<String>, cause: impl fmt::Display) -> Self {
        Error::Connect {
            host: host.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a local I/O error
    pub fn local_io(path: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Error::LocalIo {
            path: path.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Short category label used in structured log records
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Connect { .. } => "connect",
            Error::ArchiveCreate { .. } => "archive-create",
            Error::ArchiveExtract { .. } => "archive-extract",
            Error::Transport(_) => "transport",
            Error::LocalIo { .. } => "local-io",
        }
    }
}

/// Category of a transport failure
///
/// The orchestrator does not branch on the kind; it is carried for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection dropped, timed out or refused mid-session
    Network,
    /// Server refused the operation for lack of rights
    PermissionDenied,
    /// Remote path does not exist
    NotFound,
    /// Server answered with something the client did not expect
    Protocol,
    /// Local file read or write failed during a transfer
    Io,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Network => "network",
            TransportErrorKind::PermissionDenied => "permission denied",
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Io => "local i/o",
        };
        f.write_str(label)
    }
}

/// Failure of a single remote operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport error ({kind}) on {path}: {cause}")]
pub struct TransportError {
    /// Failure category
    pub kind: TransportErrorKind,
    /// Remote or local path the operation was working on
    pub path: String,
    /// Underlying error text
    pub cause: String,
}

impl TransportError {
    /// Error of `kind` on `path`
    pub fn new(kind: TransportErrorKind, path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// Connection lost or reset
    pub fn network(path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::Network, path, cause)
    }

    /// Remote path does not exist
    pub fn not_found(path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::NotFound, path, cause)
    }

    /// Server refused access to the path
    pub fn permission_denied(path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::PermissionDenied, path, cause)
    }

    /// Server reply that cannot be acted on
    pub fn protocol(path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::Protocol, path, cause)
    }

    /// Local I/O failure while moving bytes for `path`
    pub fn io(path: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::Io, path, cause)
    }
}
