//! Transport adapter glue: [`Connector`] and [`Connection`] over [`SftpClient`]

use crate::client::{SftpChannel, SftpClient};
use async_trait::async_trait;
use remote_cache_core::{
    ConnectParams, Connection, Connector, ProgressSink, Protocol, RemoteEntry, TransportError,
    TransportResult,
};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Opens SFTP sessions over SSH
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpConnector;

#[async_trait]
impl Connector for SftpConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(&self, params: &ConnectParams) -> remote_cache_core::Result<Box<dyn Connection>> {
        let client = SftpClient::connect(params)
            .await
            .map_err(|e| remote_cache_core::Error::connect(&params.host, e))?;
        Ok(Box::new(SftpConnection::new(client)))
    }
}

/// An open SFTP session
#[derive(Debug)]
pub struct SftpConnection<S = SftpChannel> {
    client: SftpClient<S>,
}

impl<S> SftpConnection<S> {
    /// Wrap an open client
    pub fn new(client: SftpClient<S>) -> Self {
        Self { client }
    }
}

fn local_error(path: &Path, cause: std::io::Error) -> TransportError {
    TransportError::io(path.display().to_string(), cause)
}

#[async_trait]
impl<S> Connection for SftpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn exists(&mut self, path: &str) -> TransportResult<bool> {
        self.client
            .session()
            .exists(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn make_dir(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .session()
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
        let mut file = File::open(local).await.map_err(|e| local_error(local, e))?;
        let total = file.metadata().await.ok().map(|m| m.len());

        self.client
            .session()
            .upload(&mut file, remote, total, progress)
            .await
            .map_err(|e| e.into_transport(remote))
    }

    async fn get_file(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &dyn ProgressSink,
    ) -> TransportResult<u64> {
        let mut file = File::create(local)
            .await
            .map_err(|e| local_error(local, e))?;

        match self.client.session().download(remote, &mut file, progress).await {
            Ok(bytes) => {
                file.sync_all().await.map_err(|e| local_error(local, e))?;
                Ok(bytes)
            }
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(local).await {
                    debug!("Could not remove partial download {}: {}", local.display(), cleanup);
                }
                Err(e.into_transport(remote))
            }
        }
    }

    async fn list_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.client
            .session()
            .list(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn remove_file(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .session()
            .remove(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn remove_empty_dir(&mut self, path: &str) -> TransportResult<()> {
        self.client
            .session()
            .rmdir(path)
            .await
            .map_err(|e| e.into_transport(path))
    }

    async fn disconnect(self: Box<Self>) -> TransportResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| e.into_transport(""))
    }
}
