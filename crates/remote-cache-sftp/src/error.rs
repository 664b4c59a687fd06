//! Error types for SFTP operations
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Errors carry the server's status and message; passwords
//! never appear in any variant

use crate::protocol::StatusCode;
use remote_cache_core::{TransportError, TransportErrorKind};
use thiserror::Error;

/// Result type alias for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the SSH channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error on a local file
    #[error("Local file error: {0}")]
    Local(std::io::Error),

    /// SSH protocol error
    ///
    /// NIST 800-53: SI-11, SC-8 (Transmission Confidentiality)
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SFTP protocol violation or unexpected message
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication), SI-11
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Non-OK `SSH_FXP_STATUS` reply
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },

    /// Operation exceeded the configured timeout
    #[error("Timed out while {0}")]
    Timeout(String),

    /// The server closed the SFTP channel
    #[error("Channel closed")]
    ChannelClosed,
}

impl Error {
    /// Error for a failure status reply
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Error::Status {
            code,
            message: message.into(),
        }
    }

    /// Classification used when the error crosses into the orchestrator
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Error::Io(_) | Error::Ssh(_) | Error::Timeout(_) | Error::ChannelClosed => {
                TransportErrorKind::Network
            }
            Error::Local(_) => TransportErrorKind::Io,
            Error::Authentication(_) => TransportErrorKind::PermissionDenied,
            Error::Protocol(_) => TransportErrorKind::Protocol,
            Error::Status { code, .. } => match code {
                StatusCode::NoSuchFile => TransportErrorKind::NotFound,
                StatusCode::PermissionDenied => TransportErrorKind::PermissionDenied,
                StatusCode::NoConnection | StatusCode::ConnectionLost => {
                    TransportErrorKind::Network
                }
                _ => TransportErrorKind::Protocol,
            },
        }
    }

    /// Attach the path the failed request was for
    pub fn into_transport(self, path: impl Into<String>) -> TransportError {
        TransportError::new(self.kind(), path, self)
    }
}

/// Convert from russh errors
impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}
