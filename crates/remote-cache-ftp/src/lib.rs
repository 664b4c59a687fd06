//! # Remote Cache FTP
//!
//! FTP transport adapter for the remote cache tool, built on `suppaftp`.
//!
//! ## Features
//!
//! - Explicit FTPS (`AUTH TLS`, `PBSZ 0`, `PROT P`) with rustls, optionally
//!   without certificate verification
//! - Passive data connections, `EPSV` first with a `PASV` fallback
//! - Binary (`TYPE I`) transfers with progress reporting
//! - `MLSD` listings with a Unix/DOS `LIST` fallback

pub mod client;
pub mod connector;
pub mod error;
pub mod tls;

pub use client::FtpClient;
pub use connector::{FtpConnection, FtpConnector};
pub use error::{FtpError, Result};
