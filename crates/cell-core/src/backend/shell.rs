use std::{fmt, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::ShellError;

/// Password credentials for a remote shell.
#[derive(Clone)]
pub struct ShellCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ShellCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runs the remote shell protocol handshake over an established TCP stream.
#[async_trait]
pub trait ShellConnector: Send + Sync + 'static {
    async fn handshake(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        credentials: &ShellCredentials,
    ) -> Result<Arc<dyn ShellClient>, ShellError>;
}

/// Authenticated remote shell connection.
///
/// Client operations are not cancellable by themselves: the only way to abort
/// in-flight I/O is [`ShellClient::close`], which must make pending and future
/// operations fail promptly. `close` may be called more than once.
#[async_trait]
pub trait ShellClient: Send + Sync + 'static {
    /// Copy `contents` to `remote_path` and make it executable.
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), ShellError>;

    /// Start an interactive login shell.
    async fn open_login_shell(&self) -> Result<Box<dyn ShellSession>, ShellError>;

    /// Tear down the underlying connection.
    async fn close(&self);
}

/// Interactive shell session driven through its standard input.
#[async_trait]
pub trait ShellSession: Send {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ShellError>;

    /// Wait for the shell to exit; a non-zero exit status is an error.
    async fn wait(&mut self) -> Result<(), ShellError>;
}

/// Shared handle to a shell connector.
pub type ShellConnectorHandle = Arc<dyn ShellConnector>;
