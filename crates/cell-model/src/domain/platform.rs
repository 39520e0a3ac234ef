use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Operating system a task instance targets.
///
/// Serialized in lowercase (`"linux"`, `"windows"`, `"darwin"`, `"freebsd"`), which is also
/// the naming used for agent binaries.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Linux,
    Windows,
    Darwin,
    FreeBsd,
}

impl PlatformKind {
    /// Lowercase OS name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Linux => "linux",
            PlatformKind::Windows => "windows",
            PlatformKind::Darwin => "darwin",
            PlatformKind::FreeBsd => "freebsd",
        }
    }

    /// Human-facing name used in error messages (e.g. `Darwin`).
    pub fn title(&self) -> &'static str {
        match self {
            PlatformKind::Linux => "Linux",
            PlatformKind::Windows => "Windows",
            PlatformKind::Darwin => "Darwin",
            PlatformKind::FreeBsd => "FreeBSD",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(PlatformKind::Linux),
            "windows" => Ok(PlatformKind::Windows),
            "darwin" | "macos" => Ok(PlatformKind::Darwin),
            "freebsd" => Ok(PlatformKind::FreeBsd),
            other => Err(ModelError::UnknownPlatform(other.to_string())),
        }
    }
}
