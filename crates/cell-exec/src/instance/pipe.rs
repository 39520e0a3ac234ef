use std::path::Path;

use async_trait::async_trait;
use cell_core::{Instance, InstanceError, Platform, RunConfig};
use cell_model::{Command, MebiBytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::container::container_working_directory;
use crate::{
    containerized::{ContainerParams, run_containerized},
    volume::{cleanup_volumes, prepare_volumes},
};

/// A window of the task's commands executed in one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeStage {
    pub image: String,
    pub command_from: String,
    /// First command of the next stage; empty for the last one.
    pub command_to: String,
}

/// Split `commands` into stages, one per command that names an image.
///
/// Commands before the first image-bearing command belong to the first stage.
pub fn pipe_stages(commands: &[Command]) -> Result<Vec<PipeStage>, InstanceError> {
    let starts: Vec<(usize, &str)> = commands
        .iter()
        .enumerate()
        .filter_map(|(i, cmd)| cmd.image().map(|image| (i, image)))
        .collect();

    if starts.is_empty() {
        return Err(InstanceError::FailedToCreate(
            "pipe has no commands with an image".into(),
        ));
    }

    let stages = starts
        .iter()
        .enumerate()
        .map(|(n, &(at, image))| {
            let from = if n == 0 { 0 } else { at };
            let command_to = starts
                .get(n + 1)
                .map(|&(next, _)| commands[next].name.clone())
                .unwrap_or_default();
            PipeStage {
                image: image.to_string(),
                command_from: commands[from].name.clone(),
                command_to,
            }
        })
        .collect();
    Ok(stages)
}

/// Multi-stage task; stages run one after another over the same volumes.
#[derive(Debug, Clone)]
pub struct PipeInstance {
    pub cpu: f32,
    pub memory: MebiBytes,
    pub stages: Vec<PipeStage>,
    pub custom_working_dir: String,
}

#[async_trait]
impl Instance for PipeInstance {
    fn name(&self) -> &'static str {
        "pipe"
    }

    #[instrument(name = "pipe_instance", skip_all, fields(stages = self.stages.len()))]
    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
        let volumes = prepare_volumes(&cancel, config).await?;
        let working_directory = self.working_directory(config.project_dir(), config.dirty_mode());

        let mut outcome = Ok(());
        for (n, stage) in self.stages.iter().enumerate() {
            debug!(stage = n, image = %stage.image, "running pipe stage");
            let params = ContainerParams {
                image: stage.image.clone(),
                cpu: self.cpu,
                memory: self.memory,
                additional_containers: Vec::new(),
                command_from: stage.command_from.clone(),
                command_to: stage.command_to.clone(),
                platform: Platform::unix(),
                agent_volume: volumes.agent.clone(),
                working_volume: volumes.working_name().to_string(),
                working_directory: working_directory.clone(),
            };
            outcome = run_containerized(&cancel, config, params).await;
            if outcome.is_err() {
                break;
            }
        }

        cleanup_volumes(config, &volumes).await;
        outcome
    }

    fn working_directory(&self, project_dir: &Path, dirty_mode: bool) -> String {
        container_working_directory(
            &self.custom_working_dir,
            &Platform::unix(),
            project_dir,
            dirty_mode,
        )
    }
}
