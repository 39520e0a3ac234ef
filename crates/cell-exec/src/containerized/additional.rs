use cell_core::{
    ContainerOptions, InstanceError, ReporterHandle,
    backend::{BackendHandle, ContainerCreateInput, ContainerResources},
    clamp,
};
use cell_model::AdditionalContainer;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pull::pull_if_needed;

/// One sidecar sharing the main container's network namespace.
pub(crate) struct Sidecar {
    pub backend: BackendHandle,
    pub reporter: ReporterHandle,
    pub options: ContainerOptions,
    pub spec: AdditionalContainer,
    pub main_id: String,
}

impl Sidecar {
    fn create_input(&self) -> ContainerCreateInput {
        ContainerCreateInput {
            image: self.spec.image.clone(),
            command: self.spec.command.clone(),
            env: self.spec.environment.clone(),
            resources: ContainerResources {
                nano_cpus: clamp::nano_cpus(self.spec.cpu),
                memory_bytes: clamp::memory_bytes(self.spec.memory),
            },
            network: Some(format!("container:{}", self.main_id)),
            ..Default::default()
        }
    }

    /// Pull, create, start and wait for the sidecar until it exits or `scope` fires.
    ///
    /// Only backend failures are errors; the exit status of the process inside
    /// is logged. The container is removed (or reported as skipped) on every
    /// path once it has been created, regardless of `scope`.
    pub async fn run(self, scope: CancellationToken) -> Result<(), InstanceError> {
        let pulled = tokio::select! {
            res = pull_if_needed(self.backend.as_ref(), &self.options, &self.spec.image) => res,
            _ = scope.cancelled() => return Ok(()),
        };
        pulled?;

        debug!(name = %self.spec.name, image = %self.spec.image, "creating additional container");
        let id = self
            .backend
            .container_create(&self.create_input(), None)
            .await
            .map_err(InstanceError::additional)?;

        let outcome = self.start_and_wait(&id, &scope).await;
        self.cleanup(&id).await;
        outcome
    }

    async fn start_and_wait(&self, id: &str, scope: &CancellationToken) -> Result<(), InstanceError> {
        if scope.is_cancelled() {
            return Ok(());
        }

        debug!(container = id, "starting additional container");
        self.backend
            .container_start(id)
            .await
            .map_err(InstanceError::additional)?;

        debug!(container = id, "waiting for additional container to finish");
        tokio::select! {
            res = self.backend.container_wait(id) => {
                let res = res.map_err(InstanceError::additional)?;
                debug!(
                    container = id,
                    status = res.status_code,
                    error = ?res.error,
                    "additional container exited",
                );
                Ok(())
            }
            _ = scope.cancelled() => Ok(()),
        }
    }

    async fn cleanup(&self, id: &str) {
        if self.options.no_cleanup {
            self.reporter.cleanup_skipped("additional container", id);
            return;
        }
        debug!(container = id, "cleaning up additional container");
        if let Err(e) = self.backend.container_delete(id).await {
            self.reporter
                .cleanup_failed("additional container", id, &e.to_string());
        }
    }
}
