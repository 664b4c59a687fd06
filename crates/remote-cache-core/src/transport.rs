//! Transport adapter capability traits
//!
//! Each protocol crate implements [`Connector`] (session establishment) and
//! [`Connection`] (the protocol primitives). Recursive directory operations
//! are provided here once, on top of those primitives, so both protocols
//! share the same walk, ordering and error semantics.

use crate::config::Protocol;
use crate::error::{Result, TransportError, TransportResult};
use crate::path;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Parameters needed to open a session
#[derive(Clone)]
pub struct ConnectParams {
    /// Remote host name or address
    pub host: String,
    /// Explicit port, protocol default when `None`
    pub port: Option<u16>,
    /// Login user
    pub user: String,
    /// Login password, never logged
    pub password: String,
    /// Upgrade FTP to TLS (always on for SFTP)
    pub secure: bool,
    /// Verify the server certificate when TLS is used
    pub verify_tls: bool,
    /// Bound on connection-level operations; zero disables it
    pub timeout: Duration,
}

impl ConnectParams {
    /// Configured port, or the default for `protocol`
    pub fn port_for(&self, protocol: Protocol) -> u16 {
        self.port.unwrap_or_else(|| protocol.default_port())
    }

    /// The timeout as an optional deadline
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("secure", &self.secure)
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Device, socket or anything else
    Other,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Bare name, never `.` or `..`
    pub name: String,
    /// Entry type
    pub kind: EntryKind,
    /// Size in bytes, for files when the server reports it
    pub size: Option<u64>,
}

/// Opens sessions for one protocol
#[async_trait]
pub trait Connector: Send + Sync {
    /// Protocol this connector speaks
    fn protocol(&self) -> Protocol;

    /// Open an authenticated session.
    ///
    /// Failures are reported as [`crate::Error::Connect`].
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>>;
}

/// An open session to the remote endpoint
///
/// Adapters implement the primitives; the recursive operations are provided.
/// A connection is consumed by [`Connection::disconnect`], so it can only be
/// closed once.
#[async_trait]
pub trait Connection: Send {
    /// Whether `path` exists (file or directory)
    async fn exists(&mut self, path: &str) -> TransportResult<bool>;

    /// Create a single directory whose parent exists
    async fn make_dir(&mut self, path: &str) -> TransportResult<()>;

    /// Upload one file, returning the number of bytes sent
    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64>;

    /// Download one file, returning the number of bytes received.
    ///
    /// The parent of `local` must exist.
    async fn get_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64>;

    /// List a remote directory, without `.` and `..`
    async fn list_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteEntry>>;

    /// Delete one remote file
    async fn remove_file(&mut self, path: &str) -> TransportResult<()>;

    /// Remove a directory that has already been emptied
    async fn remove_empty_dir(&mut self, path: &str) -> TransportResult<()>;

    /// Close the session
    async fn disconnect(self: Box<Self>) -> TransportResult<()>;

    /// Create `path` and every missing parent
    async fn ensure_dir(&mut self, path: &str) -> TransportResult<()> {
        for dir in path::ancestors(path) {
            if !self.exists(&dir).await? {
                debug!("Creating remote directory {}", dir);
                self.make_dir(&dir).await?;
            }
        }
        Ok(())
    }

    /// Upload the contents of `local` into `remote`, recursively
    async fn put_dir(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        self.ensure_dir(remote).await?;

        let mut total = 0;
        for (entry_path, is_dir) in read_local_dir(local).await? {
            let name = entry_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = path::join(remote, &name);

            if is_dir {
                total += self.put_dir(&entry_path, &target, progress).await?;
            } else {
                total += self.put_file(&entry_path, &target, progress).await?;
            }
        }

        Ok(total)
    }

    /// Download the contents of `remote` into `local`, recursively
    async fn get_dir(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| TransportError::io(local.display().to_string(), e))?;

        let mut entries = self.list_dir(remote).await?;
        check_entry_names(remote, &entries)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut total = 0;
        for entry in entries {
            let source = path::join(remote, &entry.name);
            let target = local.join(&entry.name);

            match entry.kind {
                EntryKind::Dir => total += self.get_dir(&source, &target, progress).await?,
                EntryKind::File => total += self.get_file(&source, &target, progress).await?,
                EntryKind::Symlink | EntryKind::Other => {
                    debug!("Skipping {} ({:?})", source, entry.kind);
                }
            }
        }

        Ok(total)
    }

    /// Remove `path` and everything below it
    async fn remove_dir(&mut self, path: &str) -> TransportResult<()> {
        let entries = self.list_dir(path).await?;
        check_entry_names(path, &entries)?;

        for entry in entries {
            let child = path::join(path, &entry.name);
            match entry.kind {
                EntryKind::Dir => self.remove_dir(&child).await?,
                _ => self.remove_file(&child).await?,
            }
        }

        debug!("Removing remote directory {}", path);
        self.remove_empty_dir(path).await
    }
}

/// Reject a listing if any entry name could leave the listed directory.
///
/// The whole listing is checked before anything is transferred or removed.
fn check_entry_names(dir: &str, entries: &[RemoteEntry]) -> TransportResult<()> {
    for entry in entries {
        let name = entry.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(TransportError::protocol(
                dir,
                format!("server listed unsafe entry name {:?}", name),
            ));
        }
    }
    Ok(())
}

/// Entries of a local directory as `(path, is_dir)`, sorted by name.
///
/// Symlinks are skipped, matching how the archive codec stores them as links.
async fn read_local_dir(dir: &Path) -> TransportResult<Vec<(PathBuf, bool)>> {
    let io_err = |e: std::io::Error| TransportError::io(dir.display().to_string(), e);

    let mut reader = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await.map_err(io_err)? {
        let file_type = entry.file_type().await.map_err(io_err)?;
        if file_type.is_symlink() {
            debug!("Skipping symlink {}", entry.path().display());
            continue;
        }
        entries.push((entry.path(), file_type.is_dir()));
    }

    entries.sort();
    Ok(entries)
}
