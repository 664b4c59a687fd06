//! # Remote Cache SFTP
//!
//! SFTP transport for the remote cache tool.
//!
//! ## Protocol Compliance
//!
//! - SSH transport and connection protocols (RFC 4253, RFC 4254), provided by russh
//! - SSH File Transfer Protocol, version 3 (draft-ietf-secsh-filexfer-02)
//!
//! Authentication is by password only. The SFTP layer is implemented here on
//! top of the subsystem channel; [`session::SftpSession`] works over any
//! async byte stream.

pub mod client;
pub mod connector;
pub mod error;
pub mod protocol;
pub mod session;

pub use client::{ClientHandler, SftpChannel, SftpClient};
pub use connector::{SftpConnection, SftpConnector};
pub use error::{Error, Result};
pub use session::{NameEntry, SftpSession};
