//! Transport adapter glue: [`Connector`] and [`Connection`] over [`FtpClient`]
//!
//! Local files are opened here so a missing or unreadable file is reported
//! against its local path before any command is sent.

use crate::FtpClient;
use async_trait::async_trait;
use remote_cache_core::{
    ConnectParams, Connection, Connector, Error, ProgressSink, Protocol, RemoteEntry,
    TransportError, TransportResult,
};
use std::path::Path;
use tokio::fs::File;
use tracing::debug;

/// Opens FTP sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

#[async_trait]
impl Connector for FtpConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn connect(&self, params: &ConnectParams) -> remote_cache_core::Result<Box<dyn Connection>> {
        let client = FtpClient::connect(params)
            .await
            .map_err(|e| Error::connect(&params.host, e))?;
        Ok(Box::new(FtpConnection { client }))
    }
}

/// An open FTP session
#[derive(Debug)]
pub struct FtpConnection {
    client: FtpClient,
}

fn local_error(path: &Path, cause: std::io::Error) -> TransportError {
    TransportError::io(path.display().to_string(), cause)
}

#[async_trait]
impl Connection for FtpConnection {
    async fn exists(&mut self, path: &str) -> TransportResult<bool> {
        self.client
            .exists(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn make_dir(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .mkdir(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        let file = File::open(local).await.map_err(|e| local_error(local, e))?;
        let total = file.metadata().await.ok().map(|m| m.len());

        self.client
            .put(file.into_std().await, remote, total, progress)
            .await
            .map_err(|e| e.into_transport(remote))
    }

    async fn get_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        let file = File::create(local)
            .await
            .map_err(|e| local_error(local, e))?;

        match self.client.get(remote, file.into_std().await, progress).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(local).await {
                    debug!("Could not remove partial download {}: {}", local.display(), cleanup);
                }
                Err(e.into_transport(remote))
            }
        }
    }

    async fn list_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.client
            .list(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn remove_file(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .remove_file(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn remove_empty_dir(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .remove_dir(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn disconnect(self: Box<Self>) -> TransportResult<()> {
        self.client.quit().await.map_err(|e| e.into_transport(""))
    }
}
