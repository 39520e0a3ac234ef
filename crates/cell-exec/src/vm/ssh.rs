//! SSH/SFTP remote shell on top of `russh`.
use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use cell_core::backend::{ShellClient, ShellConnector, ShellCredentials, ShellError, ShellSession};
use russh::{
    ChannelMsg, Disconnect,
    client::{self, Handle, Msg},
};
use russh_sftp::client::SftpSession;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::debug;

/// Password-authenticated SSH connector.
///
/// Host keys are not verified: guests are throwaway clones whose keys are
/// unknown in advance and which are only reachable on the host-local network.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn session_err(e: impl std::fmt::Display) -> ShellError {
    ShellError::Session(e.to_string())
}

fn transfer_err(e: impl std::fmt::Display) -> ShellError {
    ShellError::Transfer(e.to_string())
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn handshake(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        credentials: &ShellCredentials,
    ) -> Result<Arc<dyn ShellClient>, ShellError> {
        let mut handle = client::connect_stream(self.config.clone(), stream, AcceptAnyHostKey)
            .await
            .map_err(|e| ShellError::Handshake(e.to_string()))?;

        let accepted = handle
            .authenticate_password(&credentials.user, &credentials.password)
            .await
            .map_err(|e| ShellError::Handshake(e.to_string()))?;
        if !accepted {
            return Err(ShellError::AuthRejected(credentials.user.clone()));
        }

        debug!(%addr, user = %credentials.user, "SSH session established");
        Ok(Arc::new(SshClient { handle }))
    }
}

struct SshClient {
    handle: Handle<AcceptAnyHostKey>,
}

#[async_trait]
impl ShellClient for SshClient {
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), ShellError> {
        let channel = self.handle.channel_open_session().await.map_err(transfer_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(transfer_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(transfer_err)?;

        let mut file = sftp.create(remote_path).await.map_err(transfer_err)?;
        file.write_all(contents).await?;
        file.shutdown().await?;
        sftp.close().await.map_err(transfer_err)?;

        let mut chmod = self.handle.channel_open_session().await.map_err(session_err)?;
        chmod
            .exec(true, format!("chmod +x {remote_path}"))
            .await
            .map_err(session_err)?;
        wait_exit(&mut chmod).await
    }

    async fn open_login_shell(&self) -> Result<Box<dyn ShellSession>, ShellError> {
        let channel = self.handle.channel_open_session().await.map_err(session_err)?;
        channel.request_shell(true).await.map_err(session_err)?;
        Ok(Box::new(SshSession { channel }))
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

struct SshSession {
    channel: russh::Channel<Msg>,
}

#[async_trait]
impl ShellSession for SshSession {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ShellError> {
        self.channel.data(data).await.map_err(session_err)
    }

    async fn wait(&mut self) -> Result<(), ShellError> {
        wait_exit(&mut self.channel).await
    }
}

/// Drain `channel` until it closes; succeed only on exit status zero.
async fn wait_exit(channel: &mut russh::Channel<Msg>) -> Result<(), ShellError> {
    let mut status = None;
    while let Some(msg) = channel.wait().await {
        if let ChannelMsg::ExitStatus { exit_status } = msg {
            status = Some(exit_status);
        }
    }
    match status {
        Some(0) => Ok(()),
        Some(code) => Err(ShellError::ExitStatus(code)),
        None => Err(ShellError::MissingExitStatus),
    }
}
