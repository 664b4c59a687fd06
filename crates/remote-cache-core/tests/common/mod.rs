//! In-memory transport used by the orchestrator tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use remote_cache_core::progress::{FileTransfer, TransferKind};
use remote_cache_core::{
    ConnectParams, Connection, Connector, EntryKind, Error, ProgressSink, Protocol, RemoteEntry,
    Result, TransportError, TransportResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared state of the fake remote endpoint
#[derive(Default)]
pub struct RemoteState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub log: Vec<String>,
    pub connects: usize,
    pub disconnects: usize,
    /// Operation name that fails when invoked
    pub fail_on: Option<&'static str>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    pub connect_delay: Option<Duration>,
    /// Extra entries appended to the listing of a directory
    pub injected: BTreeMap<String, Vec<RemoteEntry>>,
}

impl RemoteState {
    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || path == "/" || path == "." || self.dirs.contains(path)
    }

    fn children(&self, path: &str) -> Vec<RemoteEntry> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let direct = |key: &String| {
            key.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut entries: Vec<RemoteEntry> = self
            .dirs
            .iter()
            .filter_map(|d| direct(d))
            .map(|name| RemoteEntry {
                name,
                kind: EntryKind::Dir,
                size: None,
            })
            .collect();

        entries.extend(self.files.iter().filter_map(|(key, data)| {
            direct(key).map(|name| RemoteEntry {
                name,
                kind: EntryKind::File,
                size: Some(data.len() as u64),
            })
        }));

        entries
    }
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    pub state: Arc<Mutex<RemoteState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirs(self, dirs: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for dir in dirs {
                state.dirs.insert(dir.to_string());
            }
        }
        self
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
        self
    }

    pub fn with_listed_entry(self, dir: &str, name: &str, kind: EntryKind) -> Self {
        self.state
            .lock()
            .unwrap()
            .injected
            .entry(dir.to_string())
            .or_default()
            .push(RemoteEntry {
                name: name.to_string(),
                kind,
                size: None,
            });
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>> {
        let delay = self.state.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(Error::connect(&params.host, "connection refused"));
        }
        state.connects += 1;
        state.log.push("connect".into());

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryConnection {
    fn record(&self, op: &'static str, detail: &str) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("{} {}", op, detail));
        if state.fail_on == Some(op) {
            return Err(TransportError::network(detail, format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn exists(&mut self, path: &str) -> TransportResult<bool> {
        self.record("exists", path)?;
        let state = self.state.lock().unwrap();
        Ok(state.dirs.contains(path) || state.files.contains_key(path))
    }

    async fn make_dir(&mut self, path: &str) -> TransportResult<()> {
        self.record("make_dir", path)?;
        self.state.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        self.record("put_file", remote)?;
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::io(local.display().to_string(), e))?;

        let mut transfer =
            FileTransfer::start(progress, remote, TransferKind::Upload, Some(data.len() as u64));
        transfer.advance(data.len());
        self.state
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), data);
        Ok(transfer.finish())
    }

    async fn get_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        self.record("get_file", remote)?;
        let data = self
            .state
            .lock()
            .unwrap()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::not_found(remote, "no such file"))?;

        let mut transfer =
            FileTransfer::start(progress, remote, TransferKind::Download, Some(data.len() as u64));
        tokio::fs::write(local, &data)
            .await
            .map_err(|e| TransportError::io(local.display().to_string(), e))?;
        transfer.advance(data.len());
        Ok(transfer.finish())
    }

    async fn list_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.record("list_dir", path)?;
        let state = self.state.lock().unwrap();
        if !state.is_dir(path) {
            return Err(TransportError::not_found(path, "no such directory"));
        }
        let mut entries = state.children(path);
        entries.extend(state.injected.get(path).cloned().unwrap_or_default());
        Ok(entries)
    }

    async fn remove_file(&mut self, path: &str) -> TransportResult<()> {
        self.record("remove_file", path)?;
        self.state
            .lock()
            .unwrap()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TransportError::not_found(path, "no such file"))
    }

    async fn remove_empty_dir(&mut self, path: &str) -> TransportResult<()> {
        self.record("remove_empty_dir", path)?;
        let mut state = self.state.lock().unwrap();
        if !state.children(path).is_empty() {
            return Err(TransportError::protocol(path, "directory not empty"));
        }
        if !state.dirs.remove(path) {
            return Err(TransportError::not_found(path, "no such directory"));
        }
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.log.push("disconnect".into());
        if state.fail_disconnect {
            return Err(TransportError::network("", "connection already closed"));
        }
        Ok(())
    }
}
