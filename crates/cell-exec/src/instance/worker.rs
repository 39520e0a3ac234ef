use std::path::Path;

use async_trait::async_trait;
use cell_core::{Instance, InstanceError, Platform, RunConfig};
use cell_model::MebiBytes;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    containerized::{ContainerParams, run_containerized},
    host::run_on_host,
    vm::{VmParams, run_in_vm},
    volume::{cleanup_volumes, prepare_volumes},
};

/// How a persistent worker isolates the agent.
#[derive(Debug, Clone)]
pub enum WorkerIsolation {
    /// Agent runs directly on the worker host.
    None,
    Parallels(VmParams),
    Container {
        image: String,
        cpu: f32,
        memory: MebiBytes,
    },
}

/// Task executed by the long-lived worker this process runs on.
#[derive(Debug, Clone)]
pub struct PersistentWorker {
    pub isolation: WorkerIsolation,
}

impl PersistentWorker {
    pub fn new(isolation: WorkerIsolation) -> Self {
        Self { isolation }
    }
}

#[async_trait]
impl Instance for PersistentWorker {
    fn name(&self) -> &'static str {
        "persistent_worker"
    }

    #[instrument(name = "persistent_worker", skip_all)]
    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
        match &self.isolation {
            WorkerIsolation::None => run_on_host(&cancel, config).await,
            WorkerIsolation::Parallels(params) => run_in_vm(&cancel, config, params).await,
            WorkerIsolation::Container { image, cpu, memory } => {
                let volumes = prepare_volumes(&cancel, config).await?;
                let params = ContainerParams {
                    image: image.clone(),
                    cpu: *cpu,
                    memory: *memory,
                    additional_containers: Vec::new(),
                    command_from: String::new(),
                    command_to: String::new(),
                    platform: Platform::unix(),
                    agent_volume: volumes.agent.clone(),
                    working_volume: volumes.working_name().to_string(),
                    working_directory: self
                        .working_directory(config.project_dir(), config.dirty_mode()),
                };
                let outcome = run_containerized(&cancel, config, params).await;
                cleanup_volumes(config, &volumes).await;
                outcome
            }
        }
    }

    fn working_directory(&self, project_dir: &Path, _dirty_mode: bool) -> String {
        match self.isolation {
            WorkerIsolation::None => project_dir.to_string_lossy().into_owned(),
            WorkerIsolation::Parallels(_) | WorkerIsolation::Container { .. } => {
                Platform::unix().working_directory()
            }
        }
    }
}
