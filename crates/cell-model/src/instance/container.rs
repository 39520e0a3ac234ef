use serde::{Deserialize, Serialize};

use crate::{Env, MebiBytes, PlatformKind};

/// Task running inside a main container plus optional sidecars.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerInstance {
    /// Image reference (e.g. `rust:latest`).
    pub image: String,
    /// CPU quota in cores; fractional values are allowed.
    pub cpu: f32,
    /// Memory quota in MiB.
    pub memory: MebiBytes,
    /// Sidecars sharing the main container's network namespace, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_containers: Vec<AdditionalContainer>,
    /// Container platform; only Linux and Windows are runnable.
    pub platform: PlatformKind,
    /// Windows build version used to select compatible helper images.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_version: String,
}

/// Auxiliary service container (database, cache, ...) started next to the main container.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdditionalContainer {
    pub name: String,
    pub image: String,
    /// Command override; empty keeps the image's default command.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Env::is_empty")]
    pub environment: Env,
    pub cpu: f32,
    pub memory: MebiBytes,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
}

impl AdditionalContainer {
    /// Whether any port mapping asks for a host-side port.
    pub fn maps_host_ports(&self) -> bool {
        self.ports.iter().any(PortMapping::has_host_port)
    }
}

/// Port exposed by an additional container.
///
/// `host_port` is accepted for compatibility but never bound: sidecars are only
/// reachable through the main container's network namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
}

impl PortMapping {
    /// Port mapping with only a container-side port.
    pub fn container(port: u32) -> Self {
        Self {
            container_port: port,
            host_port: 0,
        }
    }

    pub fn has_host_port(&self) -> bool {
        self.host_port != 0
    }
}
