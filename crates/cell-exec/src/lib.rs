//! Execution backends for CI tasks.
//!
//! [`select`] turns an instance payload into an [`AnyInstance`]; running it
//! provisions containers or a VM, runs the agent and tears everything down.
mod pull;
pub use pull::pull_if_needed;

mod containerized;
pub use containerized::{ContainerParams, PORTS_WAIT_FOR_ENV, run_containerized};

mod volume;
pub use volume::{TaskVolumes, cleanup_volumes, prepare_volumes};

mod host;
pub use host::run_on_host;

pub mod vm;

mod instance;
pub use instance::{
    AnyInstance, ContainerInstance, PersistentWorker, PipeInstance, PipeStage, PrebuiltInstance,
    WorkerIsolation, pipe_stages, select,
};

#[cfg(feature = "docker")]
pub mod docker;

#[cfg(test)]
pub(crate) mod testing;
