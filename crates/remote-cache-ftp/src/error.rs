//! Error types for FTP operations

use remote_cache_core::{TransportError, TransportErrorKind};
use thiserror::Error;

/// Result type alias for FTP operations
pub type Result<T> = std::result::Result<T, FtpError>;

/// FTP error types
#[derive(Error, Debug)]
pub enum FtpError {
    /// Socket error on the control or data connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local file read or write failed during a transfer
    #[error("Local I/O error: {0}")]
    Local(std::io::Error),

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Server answered a command with an unexpected code
    #[error("{command} failed: {code} {message}")]
    Reply {
        /// Command that was refused, without arguments that carry secrets
        command: String,
        /// Reply code
        code: u32,
        /// Reply text without the code
        message: String,
    },

    /// Server sent something that is not a valid reply
    #[error("Malformed server reply: {0}")]
    MalformedReply(String),

    /// The session was lost by an earlier failure
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation exceeded the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Login rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),
}

impl FtpError {
    /// Convert a `suppaftp` error raised while running `command`
    pub fn from_ftp(command: impl Into<String>, err: suppaftp::FtpError) -> Self {
        match err {
            suppaftp::FtpError::UnexpectedResponse(response) => {
                let code = response.status.code();
                FtpError::Reply {
                    command: command.into(),
                    code,
                    message: reply_text(code, &response.body),
                }
            }
            suppaftp::FtpError::ConnectionError(e) if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                FtpError::Timeout(format!("{}: {}", command.into(), e))
            }
            suppaftp::FtpError::ConnectionError(e) => FtpError::Io(e),
            suppaftp::FtpError::SecureError(e) => FtpError::Tls(e.to_string()),
            other => FtpError::MalformedReply(format!("{}: {}", command.into(), other)),
        }
    }

    /// Whether the server refused the command as unknown or unimplemented
    pub(crate) fn is_unsupported(&self) -> bool {
        matches!(self, FtpError::Reply { code: 500 | 502 | 504, .. })
    }

    /// Transport category for this error
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            FtpError::Io(_)
            | FtpError::Tls(_)
            | FtpError::ConnectionClosed(_)
            | FtpError::Timeout(_) => TransportErrorKind::Network,
            FtpError::Local(_) => TransportErrorKind::Io,
            FtpError::Authentication(_) => TransportErrorKind::PermissionDenied,
            FtpError::MalformedReply(_) => TransportErrorKind::Protocol,
            FtpError::Reply { code, message, .. } => match code {
                421 | 425 | 426 => TransportErrorKind::Network,
                530 | 532 => TransportErrorKind::PermissionDenied,
                550 | 450 => {
                    let lower = message.to_ascii_lowercase();
                    if lower.contains("denied") || lower.contains("permission") {
                        TransportErrorKind::PermissionDenied
                    } else {
                        TransportErrorKind::NotFound
                    }
                }
                _ => TransportErrorKind::Protocol,
            },
        }
    }

    /// Attach the remote path the failed operation was working on
    pub fn into_transport(self, path: &str) -> TransportError {
        TransportError::new(self.kind(), path, self)
    }
}

/// Reply text with the leading code and line separators removed
fn reply_text(code: u32, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let prefix = code.to_string();
    text.lines()
        .map(|line| {
            line.strip_prefix(prefix.as_str())
                .map(|rest| rest.trim_start_matches(['-', ' ']))
                .unwrap_or(line)
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
