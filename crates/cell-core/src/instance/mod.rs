//! Instance abstraction: one execution backend selected for a task.
//!
//! Concrete instances (containers, pipes, prebuilt images, persistent
//! workers) live in `cell-exec`; this module only defines the contract and
//! the shared run configuration.
mod config;
pub use config::RunConfig;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::InstanceError;

/// Execution backend for a single task.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Instance name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Provision the environment, run the agent to completion and tear everything down.
    ///
    /// Teardown happens before this future resolves on every exit path,
    /// including cancellation through `cancel`.
    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError>;

    /// Directory the agent will run the task's commands in.
    fn working_directory(&self, project_dir: &Path, dirty_mode: bool) -> String;
}
