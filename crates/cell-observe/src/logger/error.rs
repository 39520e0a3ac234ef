use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log format: {0} (expected: text|json|journald)")]
    InvalidFormat(String),

    #[error("journald is not supported on this platform")]
    JournaldNotSupported,

    #[error("failed to connect to journald: {0}")]
    JournaldInitFailed(String),

    #[error("logger already initialized")]
    AlreadyInitialized,

    #[error("invalid log filter: {0}")]
    InvalidLevel(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;
