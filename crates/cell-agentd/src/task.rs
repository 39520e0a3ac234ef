use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use cell_core::{ContainerOptions, RunConfig};
use cell_exec::{docker::DockerCli, vm::Prlctl, vm::SshConnector};
use cell_model::{Command, InstancePayload, TaskId};
use cell_observe::LoggerConfig;
use serde::Deserialize;

/// Environment variable naming the task file when no argument is given.
pub const TASK_FILE_ENV: &str = "CELL_TASK_FILE";

/// Everything needed to run one task, as handed over by the CI server side.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFile {
    pub instance: Option<InstancePayload>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub working_dir: String,
    pub endpoint: String,
    #[serde(default)]
    pub direct_endpoint: Option<String>,
    pub server_secret: String,
    pub client_secret: String,
    pub task_id: TaskId,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default)]
    pub dirty_mode: bool,
    #[serde(default)]
    pub container: ContainerOptions,
    pub agent_version: String,
    #[serde(default = "default_agent_dir")]
    pub agent_dir: PathBuf,
    #[serde(default)]
    pub logger: LoggerConfig,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_agent_dir() -> PathBuf {
    PathBuf::from("/usr/local/lib/cirrus-ci-agent")
}

impl fmt::Debug for TaskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFile")
            .field("instance", &self.instance.as_ref().map(|i| &i.kind))
            .field("commands", &self.commands.len())
            .field("working_dir", &self.working_dir)
            .field("endpoint", &self.endpoint)
            .field("project_dir", &self.project_dir)
            .field("dirty_mode", &self.dirty_mode)
            .field("agent_version", &self.agent_version)
            .finish_non_exhaustive()
    }
}

impl TaskFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid task file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Run configuration wired to the docker CLI and Parallels.
    pub fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::new(
            self.endpoint.clone(),
            self.server_secret.clone(),
            self.client_secret.clone(),
            self.task_id,
        )
        .with_project_dir(self.project_dir.clone())
        .with_dirty_mode(self.dirty_mode)
        .with_container_options(self.container.clone())
        .with_agent(self.agent_version.clone(), self.agent_dir.clone())
        .with_backend(Arc::new(DockerCli::default()))
        .with_vm(Arc::new(Prlctl::default()), Arc::new(SshConnector::default()));

        if let Some(direct) = &self.direct_endpoint {
            config = config.with_direct_endpoint(direct.clone());
        }
        config
    }
}

/// Task file path: first CLI argument, else [`TASK_FILE_ENV`].
pub fn task_path(mut args: impl Iterator<Item = String>) -> anyhow::Result<PathBuf> {
    args.next()
        .or_else(|| std::env::var(TASK_FILE_ENV).ok())
        .map(PathBuf::from)
        .with_context(|| format!("usage: cell-agentd <task.json> (or set {TASK_FILE_ENV})"))
}
