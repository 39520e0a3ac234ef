//! Per-task volumes: the agent binary and, in clean mode, a copy of the project.
use cell_core::{
    InstanceError, Platform, RunConfig,
    agent::AGENT_BINARY_NAME,
    backend::{ContainerBackend, ContainerCreateInput, ContainerMount},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::pull::pull_if_needed;

/// Image the agent binary is copied from.
pub fn agent_image(version: &str) -> String {
    format!("ghcr.io/cirruslabs/{AGENT_BINARY_NAME}:v{version}")
}

/// Where the project directory is mounted inside the helper container.
const HELPER_PROJECT_DIR: &str = "/project-dir";

/// Names of the volumes backing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskVolumes {
    pub agent: String,
    /// `None` in dirty mode, where the project is bind-mounted instead.
    pub working: Option<String>,
}

impl TaskVolumes {
    /// Working volume name, or an empty string in dirty mode.
    pub fn working_name(&self) -> &str {
        self.working.as_deref().unwrap_or_default()
    }
}

/// Create the task volumes and fill them using a short-lived helper container.
///
/// On failure every volume created so far is removed again.
#[instrument(skip_all)]
pub async fn prepare_volumes(
    cancel: &CancellationToken,
    config: &RunConfig,
) -> Result<TaskVolumes, InstanceError> {
    let backend = config.container_backend()?;
    let id = Uuid::new_v4().simple().to_string();

    let mut volumes = TaskVolumes {
        agent: format!("cirrus-agent-{id}"),
        working: None,
    };
    backend.volume_create(&volumes.agent).await?;

    if !config.dirty_mode() {
        let working = format!("cirrus-working-{id}");
        if let Err(e) = backend.volume_create(&working).await {
            cleanup_volumes(config, &volumes).await;
            return Err(e.into());
        }
        volumes.working = Some(working);
    }

    if let Err(e) = populate(cancel, config, backend.as_ref(), &volumes).await {
        cleanup_volumes(config, &volumes).await;
        return Err(e);
    }
    Ok(volumes)
}

async fn populate(
    cancel: &CancellationToken,
    config: &RunConfig,
    backend: &dyn ContainerBackend,
    volumes: &TaskVolumes,
) -> Result<(), InstanceError> {
    let image = agent_image(config.agent_version());
    tokio::select! {
        res = pull_if_needed(backend, config.container_options(), &image) => res?,
        _ = cancel.cancelled() => return Err(InstanceError::Canceled),
    }

    // Volumes are always filled from the Unix layout; their contents are
    // layout-independent.
    let platform = Platform::unix();
    let agent_dir = platform.container_agent_volume_dir();
    let mut script = format!("cp /bin/{AGENT_BINARY_NAME} {agent_dir}/");
    let mut mounts = vec![ContainerMount::volume(&volumes.agent, agent_dir)];

    if let Some(working) = &volumes.working {
        let working_dir = platform.working_directory();
        script.push_str(&format!(" && cp -a {HELPER_PROJECT_DIR}/. {working_dir}/"));
        mounts.push(ContainerMount::bind(
            config.project_dir().to_string_lossy(),
            HELPER_PROJECT_DIR,
        ));
        mounts.push(ContainerMount::volume(working, working_dir));
    }

    let input = ContainerCreateInput {
        image,
        entrypoint: vec!["/bin/sh".into(), "-c".into(), script],
        mounts,
        disable_selinux: cfg!(target_os = "linux"),
        ..Default::default()
    };

    debug!("populating task volumes");
    let id = backend.container_create(&input, None).await?;
    let outcome: Result<(), InstanceError> = async {
        backend.container_start(&id).await?;
        let res = tokio::select! {
            res = backend.container_wait(&id) => res?,
            _ = cancel.cancelled() => return Err(InstanceError::Canceled),
        };
        if res.status_code != 0 {
            return Err(InstanceError::FailedToCreate(format!(
                "failed to populate task volumes: helper container exited with {}",
                res.status_code
            )));
        }
        Ok(())
    }
    .await;

    if let Err(e) = backend.container_delete(&id).await {
        config
            .reporter()
            .cleanup_failed("helper container", &id, &e.to_string());
    }
    outcome
}

/// Remove the task volumes, reporting (not returning) failures.
pub async fn cleanup_volumes(config: &RunConfig, volumes: &TaskVolumes) {
    let Ok(backend) = config.container_backend() else {
        return;
    };
    let reporter = config.reporter();
    for name in std::iter::once(&volumes.agent).chain(volumes.working.as_ref()) {
        if config.container_options().no_cleanup {
            reporter.cleanup_skipped("volume", name);
            continue;
        }
        if let Err(e) = backend.volume_delete(name).await {
            reporter.cleanup_failed("volume", name, &e.to_string());
        }
    }
}
