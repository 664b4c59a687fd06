//! Execution orchestrator
//!
//! Runs one invocation end to end:
//!
//! 1. **Init**: validate the configuration before any network action
//! 2. **Connecting**: open the session, bounded by the configured timeout
//! 3. **Transferring**: run the strategy's steps; the first failure aborts the rest
//! 4. **Cleanup**: always delete temporary archives and disconnect
//! 5. **Reporting**: log the outcome and hand the result back to the caller
//!
//! Only cleanup failures are downgraded to warnings. They never replace the
//! transfer result.

use crate::archive;
use crate::config::TransferConfig;
use crate::progress::{ProgressSink, TransferProgress};
use crate::strategy::{Step, Strategy};
use crate::transport::{Connection, Connector};
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Summary of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Strategy that ran
    pub strategy: Strategy,
    /// Number of steps executed
    pub steps: usize,
    /// Files moved over the connection
    pub files: u64,
    /// Bytes moved over the connection
    pub bytes: u64,
    /// Wall time from connect to disconnect
    pub elapsed: Duration,
}

/// Drives one invocation against a protocol's [`Connector`]
pub struct Orchestrator<'a> {
    connector: &'a dyn Connector,
    progress: &'a dyn ProgressSink,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator opening sessions through `connector`
    pub fn new(connector: &'a dyn Connector, progress: &'a dyn ProgressSink) -> Self {
        Self {
            connector,
            progress,
        }
    }

    /// Run the invocation described by `config`
    pub async fn run(&self, config: &TransferConfig) -> Result<Outcome> {
        let started = Instant::now();

        // Init
        if let Err(e) = config.validate() {
            error!(category = e.category(), "Invalid configuration: {}", e);
            return Err(e);
        }
        if config.protocol != self.connector.protocol() {
            return Err(Error::config(format!(
                "{} connector cannot serve a {} transfer",
                self.connector.protocol(),
                config.protocol
            )));
        }

        let strategy = Strategy::for_config(config);
        let steps = strategy.plan(config);
        info!(
            protocol = %config.protocol,
            direction = %config.direction,
            archive = config.archive,
            strategy = %strategy,
            "Starting cache transfer"
        );

        // Connecting
        let mut connection = self.connect(config).await?;

        // Transferring
        let tally = Tally::new(self.progress);
        let mut temporaries = Vec::new();
        let result = run_steps(connection.as_mut(), &steps, &mut temporaries, &tally).await;

        // Cleanup
        remove_temporaries(&temporaries).await;
        match connection.disconnect().await {
            Ok(()) => debug!("Disconnected from {}", config.connection.host),
            Err(e) => warn!("Failed to disconnect cleanly: {}", e),
        }

        // Reporting
        match result {
            Ok(completed) => {
                let outcome = Outcome {
                    strategy,
                    steps: completed,
                    files: tally.files(),
                    bytes: tally.bytes(),
                    elapsed: started.elapsed(),
                };
                info!(
                    strategy = %strategy,
                    steps = outcome.steps,
                    files = outcome.files,
                    bytes = outcome.bytes,
                    "Cache transfer complete in {:.2}s",
                    outcome.elapsed.as_secs_f64()
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    strategy = %strategy,
                    category = e.category(),
                    "Cache transfer failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn connect(&self, config: &TransferConfig) -> Result<Box<dyn Connection>> {
        let params = &config.connection;
        info!(
            "Connecting to {}:{} as {}",
            params.host,
            params.port_for(config.protocol),
            params.user
        );

        let connecting = self.connector.connect(params);
        let connection = match params.deadline() {
            Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| {
                Error::connect(
                    &params.host,
                    format!("timed out after {} ms", limit.as_millis()),
                )
            })?,
            None => connecting.await,
        };

        match connection {
            Ok(connection) => Ok(connection),
            Err(e) => {
                error!(category = e.category(), "{}", e);
                Err(e)
            }
        }
    }
}

/// Execute `steps` in order, registering temporary files before they are created
async fn run_steps(
    connection: &mut dyn Connection,
    steps: &[Step],
    temporaries: &mut Vec<PathBuf>,
    progress: &dyn ProgressSink,
) -> Result<usize> {
    for (index, step) in steps.iter().enumerate() {
        debug!(
            step = index + 1,
            of = steps.len(),
            remote = step.is_remote(),
            "Running step: {}",
            step
        );

        if let Some(path) = step.temporary_file() {
            temporaries.push(path.to_path_buf());
        }

        run_step(connection, step, progress).await?;
    }

    Ok(steps.len())
}

async fn run_step(
    connection: &mut dyn Connection,
    step: &Step,
    progress: &dyn ProgressSink,
) -> Result<()> {
    match step {
        Step::Pack { source, archive } => {
            archive::pack_dir(source.clone(), archive.clone()).await?;
        }
        Step::EnsureRemoteDir { path } => {
            connection.ensure_dir(path).await?;
        }
        Step::PutFile { local, remote } => {
            connection.put_file(local, remote, progress).await?;
        }
        Step::RemoveStaleDir { path } => {
            if connection.exists(path).await? {
                info!("Removing stale remote directory {}", path);
                connection.remove_dir(path).await?;
            } else {
                debug!("No stale remote directory at {}", path);
            }
        }
        Step::PutDir { local, remote } => {
            connection.put_dir(local, remote, progress).await?;
        }
        Step::GetFile { remote, local } => {
            if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::local_io(parent.display(), e))?;
            }
            connection.get_file(remote, local, progress).await?;
        }
        Step::Unpack { archive, into } => {
            archive::unpack_into(archive.clone(), into.clone()).await?;
        }
        Step::GetDir { remote, local } => {
            connection.get_dir(remote, local, progress).await?;
        }
        Step::RemoveFile { path } => {
            connection.remove_file(path).await?;
        }
        Step::RemoveDir { path } => {
            connection.remove_dir(path).await?;
        }
        Step::DeleteLocal { path } => {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::local_io(path.display(), e))?;
        }
    }

    Ok(())
}

/// Best-effort removal of every temporary file that still exists
async fn remove_temporaries(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed temporary archive {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove temporary archive {}: {}",
                path.display(),
                e
            ),
        }
    }
}

/// Forwards progress to the caller's sink while counting completed files
struct Tally<'a> {
    inner: &'a dyn ProgressSink,
    files: AtomicU64,
    bytes: AtomicU64,
}

impl<'a> Tally<'a> {
    fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for Tally<'_> {
    fn update(&self, progress: &TransferProgress) {
        if progress.done {
            self.files.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(progress.bytes, Ordering::Relaxed);
        }
        self.inner.update(progress);
    }
}
