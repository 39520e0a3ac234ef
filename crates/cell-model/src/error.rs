use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown instance kind: {0}")]
    UnknownInstanceKind(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("invalid {kind} instance: {reason}")]
    InvalidInstance { kind: &'static str, reason: String },

    #[error("invalid model: {0}")]
    Invalid(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
