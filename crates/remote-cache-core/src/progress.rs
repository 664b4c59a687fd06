//! Transfer progress reporting
//!
//! Adapters never log progress themselves. They drive a [`FileTransfer`]
//! which forwards snapshots to whatever [`ProgressSink`] the caller passed in.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Direction of a single file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Local to remote
    Upload,
    /// Remote to local
    Download,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Upload => f.write_str("upload"),
            TransferKind::Download => f.write_str("download"),
        }
    }
}

/// Snapshot of one file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Remote path of the file
    pub name: String,
    /// Transfer direction
    pub kind: TransferKind,
    /// Bytes moved so far
    pub bytes: u64,
    /// Total size, when the server or local file reports it
    pub total: Option<u64>,
    /// Set on the final snapshot of a file
    pub done: bool,
}

/// Receiver of progress snapshots
pub trait ProgressSink: Send + Sync {
    /// Called with each new snapshot of a transfer
    fn update(&self, progress: &TransferProgress);
}

/// Sink that drops every snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _progress: &TransferProgress) {}
}

/// Per-file progress driver used by transport adapters
pub struct FileTransfer<'a> {
    sink: &'a dyn ProgressSink,
    progress: TransferProgress,
}

impl<'a> FileTransfer<'a> {
    /// Start tracking a file and emit the initial zero-byte snapshot
    pub fn start(
        sink: &'a dyn ProgressSink,
        name: impl Into<String>,
        kind: TransferKind,
        total: Option<u64>,
    ) -> Self {
        let progress = TransferProgress {
            name: name.into(),
            kind,
            bytes: 0,
            total,
            done: false,
        };
        sink.update(&progress);
        Self { sink, progress }
    }

    /// Record `bytes` more and emit a snapshot
    pub fn advance(&mut self, bytes: usize) {
        self.progress.bytes += bytes as u64;
        self.sink.update(&self.progress);
    }

    /// Bytes moved so far
    pub fn bytes(&self) -> u64 {
        self.progress.bytes
    }

    /// Emit the final snapshot and return the bytes transferred
    pub fn finish(mut self) -> u64 {
        self.progress.done = true;
        self.sink.update(&self.progress);
        self.progress.bytes
    }
}

/// Sink that reports through `tracing`
///
/// Completed files are logged at info level together with the running total
/// for the invocation. Intermediate snapshots are logged at debug level, at
/// most once per `interval`.
pub struct TracingProgress {
    interval: Duration,
    last_update: Mutex<Option<Instant>>,
    overall: AtomicU64,
}

impl TracingProgress {
    /// Sink logging intermediate snapshots at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: Mutex::new(None),
            overall: AtomicU64::new(0),
        }
    }

    /// Bytes of all completed files so far
    pub fn overall(&self) -> u64 {
        self.overall.load(Ordering::Relaxed)
    }

    fn due(&self) -> bool {
        let Ok(mut last) = self.last_update.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ProgressSink for TracingProgress {
    fn update(&self, progress: &TransferProgress) {
        if progress.done {
            let overall = self.overall.fetch_add(progress.bytes, Ordering::Relaxed) + progress.bytes;
            info!(
                file = %progress.name,
                kind = %progress.kind,
                bytes = progress.bytes,
                overall,
                "Transferred {}",
                progress.name
            );
        } else if self.due() {
            let overall = self.overall() + progress.bytes;
            debug!(
                file = %progress.name,
                kind = %progress.kind,
                bytes = progress.bytes,
                total = progress.total,
                overall,
                "Transfer in progress"
            );
        }
    }
}
