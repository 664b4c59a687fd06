//! Archive codec
//!
//! Packs a directory tree into a gzip-compressed tar (`.tgz`) and unpacks it
//! again. Entries are stored relative to the packed directory, so unpacking
//! into a directory reproduces the tree directly underneath it.
//!
//! The codec only touches the local filesystem. The async wrappers move the
//! blocking work onto tokio's blocking pool.

use crate::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

fn create_error(path: &Path, cause: impl std::fmt::Display) -> Error {
    Error::ArchiveCreate {
        path: path.display().to_string(),
        cause: cause.to_string(),
    }
}

fn extract_error(path: &Path, cause: impl std::fmt::Display) -> Error {
    Error::ArchiveExtract {
        path: path.display().to_string(),
        cause: cause.to_string(),
    }
}

/// Pack `source` into the archive file at `archive`.
///
/// Returns the size of the written archive in bytes.
pub fn pack(source: &Path, archive: &Path) -> Result<u64> {
    // The source must be an existing, readable directory before anything is written
    let metadata = fs::metadata(source)
        .map_err(|e| create_error(source, format!("source directory is not accessible: {}", e)))?;
    if !metadata.is_dir() {
        return Err(create_error(source, "source is not a directory"));
    }
    fs::read_dir(source)
        .map_err(|e| create_error(source, format!("source directory is not readable: {}", e)))?;

    let file = File::create(archive).map_err(|e| create_error(archive, e))?;
    let archive_abs = fs::canonicalize(archive).map_err(|e| create_error(archive, e))?;

    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| create_error(source, e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| create_error(entry.path(), e))?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, entry.path())
                .map_err(|e| create_error(entry.path(), e))?;
        } else {
            if is_same_file(entry.path(), archive, &archive_abs) {
                debug!("Skipping archive {} inside its own source", entry.path().display());
                continue;
            }
            builder
                .append_path_with_name(entry.path(), relative)
                .map_err(|e| create_error(entry.path(), e))?;
        }
        entries += 1;
    }

    let encoder = builder.into_inner().map_err(|e| create_error(archive, e))?;
    let file = encoder.finish().map_err(|e| create_error(archive, e))?;
    file.sync_all().map_err(|e| create_error(archive, e))?;

    let size = fs::metadata(archive).map_err(|e| create_error(archive, e))?.len();
    info!(
        source = %source.display(),
        archive = %archive.display(),
        entries,
        bytes = size,
        "Created archive"
    );

    Ok(size)
}

fn is_same_file(candidate: &Path, archive: &Path, archive_abs: &Path) -> bool {
    if candidate.file_name() != archive.file_name() {
        return false;
    }
    fs::canonicalize(candidate)
        .map(|p| p == archive_abs)
        .unwrap_or(false)
}

/// Extract the archive at `archive` into `into`.
///
/// Returns the number of entries written. Entries that would escape `into`
/// are skipped.
pub fn unpack(archive: &Path, into: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| extract_error(archive, e))?;
    fs::create_dir_all(into).map_err(|e| extract_error(into, e))?;

    let mut tar = Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);

    let mut written = 0usize;
    for entry in tar.entries().map_err(|e| extract_error(archive, e))? {
        let mut entry = entry.map_err(|e| extract_error(archive, e))?;
        let entry_path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        if entry.unpack_in(into).map_err(|e| extract_error(archive, e))? {
            written += 1;
        } else {
            warn!("Skipping archive entry outside the target directory: {}", entry_path);
        }
    }

    info!(
        archive = %archive.display(),
        into = %into.display(),
        entries = written,
        "Extracted archive"
    );

    Ok(written)
}

/// Async wrapper around [`pack`]
pub async fn pack_dir(source: PathBuf, archive: PathBuf) -> Result<u64> {
    let target = archive.clone();
    tokio::task::spawn_blocking(move || pack(&source, &archive))
        .await
        .map_err(|e| create_error(&target, join_cause(e)))?
}

/// Async wrapper around [`unpack`]
pub async fn unpack_into(archive: PathBuf, into: PathBuf) -> Result<usize> {
    let source = archive.clone();
    tokio::task::spawn_blocking(move || unpack(&archive, &into))
        .await
        .map_err(|e| extract_error(&source, join_cause(e)))?
}

fn join_cause(err: tokio::task::JoinError) -> io::Error {
    io::Error::other(format!("archive task failed: {}", err))
}
