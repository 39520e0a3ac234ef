use std::path::Path;

use async_trait::async_trait;
use cell_core::{Instance, InstanceError, Platform, RunConfig};
use cell_model::{AdditionalContainer, MebiBytes};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    containerized::{ContainerParams, run_containerized},
    volume::{cleanup_volumes, prepare_volumes},
};

/// Task running in a single main container plus sidecars.
#[derive(Debug, Clone)]
pub struct ContainerInstance {
    pub image: String,
    pub cpu: f32,
    pub memory: MebiBytes,
    pub additional_containers: Vec<AdditionalContainer>,
    pub platform: Platform,
    /// Overrides the computed working directory when non-empty.
    pub custom_working_dir: String,
}

/// Working directory shared by the container-based instances.
pub(crate) fn container_working_directory(
    custom: &str,
    platform: &Platform,
    project_dir: &Path,
    dirty_mode: bool,
) -> String {
    if !custom.is_empty() {
        custom.to_string()
    } else if dirty_mode {
        project_dir.to_string_lossy().into_owned()
    } else {
        platform.working_directory()
    }
}

#[async_trait]
impl Instance for ContainerInstance {
    fn name(&self) -> &'static str {
        "container"
    }

    #[instrument(name = "container_instance", skip_all, fields(image = %self.image))]
    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
        let volumes = prepare_volumes(&cancel, config).await?;

        let params = ContainerParams {
            image: self.image.clone(),
            cpu: self.cpu,
            memory: self.memory,
            additional_containers: self.additional_containers.clone(),
            command_from: String::new(),
            command_to: String::new(),
            platform: self.platform.clone(),
            agent_volume: volumes.agent.clone(),
            working_volume: volumes.working_name().to_string(),
            working_directory: self.working_directory(config.project_dir(), config.dirty_mode()),
        };
        let outcome = run_containerized(&cancel, config, params).await;

        cleanup_volumes(config, &volumes).await;
        outcome
    }

    fn working_directory(&self, project_dir: &Path, dirty_mode: bool) -> String {
        container_working_directory(&self.custom_working_dir, &self.platform, project_dir, dirty_mode)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeBackend, RecordingReporter, WaitMode, run_config};

    fn instance() -> ContainerInstance {
        ContainerInstance {
            image: "rust:latest".into(),
            cpu: 2.0,
            memory: 2048,
            additional_containers: Vec::new(),
            platform: Platform::unix(),
            custom_working_dir: String::new(),
        }
    }

    #[test]
    fn working_directory_precedence() {
        let mut inst = instance();
        assert_eq!(
            inst.working_directory(Path::new("/src"), false),
            "/tmp/cirrus-ci/working-dir"
        );
        assert_eq!(inst.working_directory(Path::new("/src"), true), "/src");

        inst.custom_working_dir = "/custom".into();
        assert_eq!(inst.working_directory(Path::new("/src"), true), "/custom");
    }

    #[tokio::test]
    async fn runs_with_task_volumes_and_removes_them() {
        let backend = FakeBackend::new();
        let reporter = Arc::new(RecordingReporter::default());
        let config = run_config(&backend, &reporter);

        instance()
            .run(CancellationToken::new(), &config)
            .await
            .unwrap();

        let main = &backend.inputs_for("rust:latest")[0];
        assert!(main.mounts.iter().any(|m| m.source.starts_with("cirrus-agent-")));
        assert!(main.mounts.iter().any(|m| m.source.starts_with("cirrus-working-")
            && m.target == "/tmp/cirrus-ci/working-dir"));
        assert_eq!(backend.count("volume-create:"), 2);
        assert_eq!(backend.count("volume-delete:"), 2);
        assert!(backend.position("delete:rust:latest") < backend.position_prefix("volume-delete:"));
    }

    #[tokio::test]
    async fn volumes_are_removed_after_a_failed_run() {
        let backend = FakeBackend::new();
        backend.set_wait("rust:latest", WaitMode::Fail("daemon went away"));
        let reporter = Arc::new(RecordingReporter::default());
        let config = run_config(&backend, &reporter);

        let err = instance()
            .run(CancellationToken::new(), &config)
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::Backend(_)));
        assert_eq!(backend.count("volume-delete:"), 2);
    }
}
