//! # Remote Cache Core
//!
//! Transfer-mode decision engine for the remote cache tool.
//!
//! A single invocation moves one named tree of files between a local
//! directory and a remote FTP or SFTP endpoint, optionally packed into a
//! `.tgz` archive first. This crate holds everything that is independent of
//! the wire protocol:
//!
//! - [`config`]: the validated [`TransferConfig`] and the raw [`Inputs`] it is built from
//! - [`strategy`]: maps (direction, archive) to one of six operation sequences
//! - [`transport`]: the [`Connector`]/[`Connection`] capability traits implemented per protocol
//! - [`archive`]: gzip-compressed tar pack/unpack
//! - [`orchestrator`]: connection lifecycle, temporary-file cleanup and error reporting
//! - [`progress`]: progress sinks passed into file transfers

pub mod archive;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod path;
pub mod progress;
pub mod strategy;
pub mod transport;

pub use config::{Direction, Inputs, Protocol, TransferConfig};
pub use error::{Error, Result, TransportError, TransportErrorKind, TransportResult};
pub use orchestrator::{Orchestrator, Outcome};
pub use progress::{FileTransfer, NoProgress, ProgressSink, TracingProgress, TransferKind, TransferProgress};
pub use strategy::{Step, Strategy};
pub use transport::{ConnectParams, Connection, Connector, EntryKind, RemoteEntry};
