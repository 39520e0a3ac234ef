use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MebiBytes, PlatformKind};

/// Task executed by this (long-lived) worker under the given isolation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistentWorkerInstance {
    /// Isolation to apply; `None` means no isolation at all.
    pub isolation: Option<Isolation>,
}

/// Isolation policy of a persistent worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Isolation {
    /// Run the agent directly on the host.
    None,
    /// Run the agent in a fresh Parallels VM cloned from a template.
    Parallels(ParallelsIsolation),
    /// Run the agent in a container on the worker's container backend.
    Container(ContainerIsolation),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelsIsolation {
    /// Template VM to clone from.
    pub image: String,
    /// SSH user inside the guest.
    pub user: String,
    /// SSH password inside the guest.
    pub password: String,
    /// Guest operating system, selects the agent binary to upload.
    #[serde(default = "default_parallels_platform")]
    pub platform: PlatformKind,
}

fn default_parallels_platform() -> PlatformKind {
    PlatformKind::Darwin
}

impl fmt::Debug for ParallelsIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelsIsolation")
            .field("image", &self.image)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("platform", &self.platform)
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerIsolation {
    pub image: String,
    pub cpu: f32,
    pub memory: MebiBytes,
}

/// Docker-enabled host selected by platform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerBuilderInstance {
    /// Host OS the builder requires.
    pub platform: PlatformKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let iso = ParallelsIsolation {
            image: "macos".into(),
            user: "admin".into(),
            password: "hunter2".into(),
            platform: PlatformKind::Darwin,
        };
        let dbg = format!("{iso:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn none_isolation_is_a_bare_tag() {
        let iso: Isolation = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert_eq!(iso, Isolation::None);
    }
}
