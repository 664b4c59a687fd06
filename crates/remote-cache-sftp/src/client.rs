//! SFTP client
//!
//! Opens an SSH connection with russh, authenticates with a password and
//! starts the "sftp" subsystem on a session channel.
//!
//! NIST 800-53: SC-8 (Transmission Confidentiality), IA-2 (Identification and Authentication)

use crate::session::{SftpSession, with_timeout};
use crate::{Error, Result};
use remote_cache_core::{ConnectParams, Protocol};
use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::{ChannelStream, Disconnect};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Byte stream of the SFTP subsystem channel
pub type SftpChannel = ChannelStream<Msg>;

/// SSH client event handler
///
/// NIST 800-53: IA-3 (Device Identification and Authentication)
/// Implementation: The host key fingerprint is logged for every connection;
/// keys are not pinned
pub struct ClientHandler {
    host: String,
}

impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        info!(
            "Host key for {}: {}",
            self.host,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// SFTP session, with the SSH connection that carries it when there is one
pub struct SftpClient<S = SftpChannel> {
    session: SftpSession<S>,
    ssh: Option<Handle<ClientHandler>>,
}

impl SftpClient {
    /// Connect, authenticate and start the SFTP subsystem.
    ///
    /// The connection timeout bounds the whole sequence.
    pub async fn connect(params: &ConnectParams) -> Result<Self> {
        let port = params.port_for(Protocol::Sftp);
        let timeout = params.deadline();

        let (ssh, session) = with_timeout(timeout, "establishing SFTP session", async {
            let config = Arc::new(client::Config::default());
            let handler = ClientHandler {
                host: params.host.clone(),
            };

            let mut ssh = client::connect(config, (params.host.as_str(), port), handler).await?;
            debug!("SSH connection to {}:{} established", params.host, port);

            let auth = ssh
                .authenticate_password(params.user.as_str(), params.password.as_str())
                .await?;
            if !auth.success() {
                return Err(Error::Authentication(format!(
                    "password rejected for user {}",
                    params.user
                )));
            }

            let channel = ssh.channel_open_session().await?;
            channel.request_subsystem(true, "sftp").await?;
            let session = SftpSession::init(channel.into_stream(), None).await?;
            Ok::<_, Error>((ssh, session))
        })
        .await?;

        info!(
            "Logged in to {}:{} as {} (SFTP version {})",
            params.host,
            port,
            params.user,
            session.version()
        );

        Ok(Self {
            session: session.with_request_timeout(timeout),
            ssh: Some(ssh),
        })
    }
}

impl<S> SftpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a session whose transport is managed elsewhere
    pub fn from_session(session: SftpSession<S>) -> Self {
        Self { session, ssh: None }
    }

    /// The SFTP session
    pub fn session(&mut self) -> &mut SftpSession<S> {
        &mut self.session
    }

    /// Close the SFTP channel and the SSH connection
    pub async fn disconnect(self) -> Result<()> {
        if let Err(e) = self.session.shutdown().await {
            debug!("SFTP channel shutdown: {}", e);
        }
        if let Some(ssh) = self.ssh {
            ssh.disconnect(Disconnect::ByApplication, "", "en").await?;
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for SftpClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient")
            .field("session", &self.session)
            .field("ssh", &self.ssh.is_some())
            .finish()
    }
}
