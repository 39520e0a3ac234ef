//! Contracts for the collaborators the orchestrators drive.
//!
//! - [`ContainerBackend`]: image/container/volume primitives (docker, podman, ...).
//! - [`VmBackend`] and [`Vm`]: clone-from-template virtual machines.
//! - [`ShellConnector`], [`ShellClient`], [`ShellSession`]: remote shell over an
//!   already established TCP stream.
//!
//! Every handle is shared between tasks, so implementations must be safe for
//! concurrent use; the orchestrators never hold locks across these calls.
mod error;
pub use error::{BackendError, ShellError, VmError};

mod container;
pub use container::{
    BackendHandle, ContainerBackend, ContainerCreateInput, ContainerMount, ContainerResources,
    ImageBuildInput, MountKind, SystemInfo, WaitResult,
};

mod vm;
pub use vm::{Vm, VmBackend, VmBackendHandle};

mod shell;
pub use shell::{
    ShellClient, ShellConnector, ShellConnectorHandle, ShellCredentials, ShellSession,
};
