//! Transfer strategy selection
//!
//! `(direction, archive)` selects exactly one of six strategies, and each
//! strategy expands into a fixed sequence of [`Step`]s for a given
//! configuration. Both functions are pure; nothing here touches the network
//! or the filesystem.

use crate::config::{Direction, TransferConfig};
use crate::path;
use std::fmt;
use std::path::{Path, PathBuf};

/// One of the six transfer strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Pack the source and upload one archive
    UploadArchive,
    /// Mirror a local tree onto the remote
    UploadDirectory,
    /// Fetch one archive and unpack it
    DownloadArchive,
    /// Mirror a remote tree locally
    DownloadDirectory,
    /// Remove the remote archive
    DeleteArchive,
    /// Remove a remote tree
    DeleteDirectory,
}

/// A single operation of a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Pack a local directory into a local archive
    Pack { source: PathBuf, archive: PathBuf },
    /// Create a remote directory and its parents if absent
    EnsureRemoteDir { path: String },
    /// Upload one local file
    PutFile { local: PathBuf, remote: String },
    /// Remove a remote directory tree if it exists
    RemoveStaleDir { path: String },
    /// Upload a local directory tree
    PutDir { local: PathBuf, remote: String },
    /// Download one remote file
    GetFile { remote: String, local: PathBuf },
    /// Extract a local archive into a directory
    Unpack { archive: PathBuf, into: PathBuf },
    /// Download a remote directory tree
    GetDir { remote: String, local: PathBuf },
    /// Remove one remote file
    RemoveFile { path: String },
    /// Remove a remote directory tree
    RemoveDir { path: String },
    /// Delete a local file
    DeleteLocal { path: PathBuf },
}

impl Step {
    /// Local file this step creates that must not outlive the invocation.
    ///
    /// Single files are only fetched as archives awaiting extraction, so a
    /// downloaded file is always temporary.
    pub fn temporary_file(&self) -> Option<&Path> {
        match self {
            Step::Pack { archive, .. } => Some(archive),
            Step::GetFile { local, .. } => Some(local),
            _ => None,
        }
    }

    /// Whether this step needs an open connection
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            Step::Pack { .. } | Step::Unpack { .. } | Step::DeleteLocal { .. }
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Pack { source, archive } => {
                write!(f, "pack {} -> {}", source.display(), archive.display())
            }
            Step::EnsureRemoteDir { path } => write!(f, "ensure remote dir {}", path),
            Step::PutFile { local, remote } => write!(f, "put {} -> {}", local.display(), remote),
            Step::RemoveStaleDir { path } => write!(f, "remove stale dir {}", path),
            Step::PutDir { local, remote } => {
                write!(f, "put dir {} -> {}", local.display(), remote)
            }
            Step::GetFile { remote, local } => write!(f, "get {} -> {}", remote, local.display()),
            Step::Unpack { archive, into } => {
                write!(f, "unpack {} -> {}", archive.display(), into.display())
            }
            Step::GetDir { remote, local } => {
                write!(f, "get dir {} -> {}", remote, local.display())
            }
            Step::RemoveFile { path } => write!(f, "remove file {}", path),
            Step::RemoveDir { path } => write!(f, "remove dir {}", path),
            Step::DeleteLocal { path } => write!(f, "delete local {}", path.display()),
        }
    }
}

impl Strategy {
    /// Select the strategy for a direction and archive flag
    pub fn select(direction: Direction, archive: bool) -> Self {
        match (direction, archive) {
            (Direction::Upload, true) => Strategy::UploadArchive,
            (Direction::Upload, false) => Strategy::UploadDirectory,
            (Direction::Download, true) => Strategy::DownloadArchive,
            (Direction::Download, false) => Strategy::DownloadDirectory,
            (Direction::Delete, true) => Strategy::DeleteArchive,
            (Direction::Delete, false) => Strategy::DeleteDirectory,
        }
    }

    /// Strategy for a validated configuration
    pub fn for_config(config: &TransferConfig) -> Self {
        Self::select(config.direction, config.archive)
    }

    /// Name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Strategy::UploadArchive => "upload-archive",
            Strategy::UploadDirectory => "upload-directory",
            Strategy::DownloadArchive => "download-archive",
            Strategy::DownloadDirectory => "download-directory",
            Strategy::DeleteArchive => "delete-archive",
            Strategy::DeleteDirectory => "delete-directory",
        }
    }

    /// Expand the strategy into its operation sequence
    pub fn plan(self, config: &TransferConfig) -> Vec<Step> {
        let archive_file = config.archive_file_name();

        match self {
            Strategy::UploadArchive => {
                let local_archive = config.work_dir.join(&archive_file);
                vec![
                    Step::Pack {
                        source: PathBuf::from(&config.source),
                        archive: local_archive.clone(),
                    },
                    Step::EnsureRemoteDir {
                        path: path::to_posix(&config.destination),
                    },
                    Step::PutFile {
                        local: local_archive.clone(),
                        remote: path::join(&config.destination, &archive_file),
                    },
                    Step::DeleteLocal {
                        path: local_archive,
                    },
                ]
            }
            Strategy::UploadDirectory => {
                let remote = path::to_posix(&config.destination);
                vec![
                    Step::RemoveStaleDir {
                        path: remote.clone(),
                    },
                    Step::PutDir {
                        local: PathBuf::from(&config.source),
                        remote,
                    },
                ]
            }
            Strategy::DownloadArchive => {
                let local_dir = PathBuf::from(&config.destination);
                let local_archive = local_dir.join(&archive_file);
                vec![
                    Step::GetFile {
                        remote: path::join(&config.source, &archive_file),
                        local: local_archive.clone(),
                    },
                    Step::Unpack {
                        archive: local_archive.clone(),
                        into: local_dir,
                    },
                    Step::DeleteLocal {
                        path: local_archive,
                    },
                ]
            }
            Strategy::DownloadDirectory => vec![Step::GetDir {
                remote: path::to_posix(&config.source),
                local: PathBuf::from(&config.destination),
            }],
            Strategy::DeleteArchive => vec![Step::RemoveFile {
                path: path::join(&config.source, &archive_file),
            }],
            Strategy::DeleteDirectory => vec![Step::RemoveDir {
                path: path::to_posix(&config.source),
            }],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
