use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container backend unavailable: {0}")]
    Unavailable(String),

    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("unexpected backend output: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn op(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Operation {
            op,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("no DHCP lease found for VM {0}")]
    NoAddress(String),

    #[error("unexpected VM backend output: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("authentication rejected for user {0}")]
    AuthRejected(String),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("session failed: {0}")]
    Session(String),

    #[error("remote command exited with status {0}")]
    ExitStatus(u32),

    #[error("session closed without an exit status")]
    MissingExitStatus,

    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
