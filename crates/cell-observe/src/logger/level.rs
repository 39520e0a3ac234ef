use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use super::LoggerError;

/// Validated `EnvFilter` expression.
///
/// Kept as a string so the config stays cloneable and serializable; the
/// filter itself is built when the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoggerLevel(String);

impl LoggerLevel {
    pub fn new(s: impl Into<String>) -> Result<Self, LoggerError> {
        Self::try_from(s.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the filter; `RUST_LOG` takes precedence when it is set and valid.
    pub fn to_env_filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        EnvFilter::try_new(self.as_str()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LoggerLevel {
    fn default() -> Self {
        LoggerLevel("info".to_string())
    }
}

impl FromStr for LoggerLevel {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for LoggerLevel {
    type Error = LoggerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EnvFilter::try_new(&s)
            .map(|_| LoggerLevel(s.clone()))
            .map_err(|e| LoggerError::InvalidLevel(format!("{s}: {e}")))
    }
}

impl From<LoggerLevel> for String {
    fn from(l: LoggerLevel) -> Self {
        l.0
    }
}
