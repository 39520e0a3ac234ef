use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use cell_model::Env;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::BackendError;

/// Host capacity as reported by the container daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemInfo {
    pub total_cpus: u32,
    pub total_memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMount {
    pub kind: MountKind,
    /// Host path for binds, volume name for volumes.
    pub source: String,
    pub target: String,
}

impl ContainerMount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Hard resource limits; zero means "unlimited".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerResources {
    pub nano_cpus: i64,
    pub memory_bytes: i64,
}

/// Everything needed to create (but not start) a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerCreateInput {
    pub image: String,
    /// Replaces the image entrypoint; first element is the executable.
    pub entrypoint: Vec<String>,
    /// Replaces the image command.
    pub command: Vec<String>,
    pub env: Env,
    pub mounts: Vec<ContainerMount>,
    pub resources: ContainerResources,
    /// Network to attach to, e.g. `container:<id>` to join another container's namespace.
    pub network: Option<String>,
    /// Turn off SELinux labeling for this container.
    pub disable_selinux: bool,
}

/// Terminal state of a container that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    pub status_code: i64,
    /// Runtime error reported for the process inside the container, if any.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildInput {
    pub tag: String,
    pub context_dir: PathBuf,
    /// Dockerfile path relative to `context_dir`; empty means the default `Dockerfile`.
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
}

/// Container runtime primitives consumed by the orchestrators.
///
/// Futures returned by these methods may be dropped at any await point
/// (the orchestrators race them against cancellation); implementations must
/// not leave shared state inconsistent when that happens.
#[async_trait]
pub trait ContainerBackend: Send + Sync + 'static {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    async fn system_info(&self) -> Result<SystemInfo, BackendError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, BackendError>;

    async fn image_pull(&self, reference: &str) -> Result<(), BackendError>;

    async fn image_build(&self, input: &ImageBuildInput) -> Result<(), BackendError>;

    async fn volume_create(&self, name: &str) -> Result<(), BackendError>;

    async fn volume_delete(&self, name: &str) -> Result<(), BackendError>;

    /// Create a container and return its identifier.
    async fn container_create(
        &self,
        input: &ContainerCreateInput,
        name: Option<&str>,
    ) -> Result<String, BackendError>;

    async fn container_start(&self, id: &str) -> Result<(), BackendError>;

    /// Resolve once the container has stopped.
    ///
    /// A non-zero exit code is a successful wait; `Err` means the backend
    /// itself failed to observe the container.
    async fn container_wait(&self, id: &str) -> Result<WaitResult, BackendError>;

    /// Stream the container's output lines.
    ///
    /// The returned channel closes when the container's output ends or `cancel` fires.
    async fn container_logs(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, BackendError>;

    /// Force-remove a container together with its anonymous volumes.
    async fn container_delete(&self, id: &str) -> Result<(), BackendError>;
}

/// Shared handle to a container backend.
pub type BackendHandle = Arc<dyn ContainerBackend>;
