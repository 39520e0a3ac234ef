//! Concrete instances and the dispatcher that picks one for a task.
mod container;
pub use container::ContainerInstance;

mod pipe;
pub use pipe::{PipeInstance, PipeStage, pipe_stages};

mod prebuilt;
pub use prebuilt::PrebuiltInstance;

mod worker;
pub use worker::{PersistentWorker, WorkerIsolation};

use std::path::Path;

use async_trait::async_trait;
use cell_core::{
    Instance, InstanceError, Platform, RunConfig, backend::ShellCredentials, platform::host_os,
};
use cell_model::{
    Command, InstanceDescriptor, InstancePayload, Isolation, ModelError, PlatformKind,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::vm::VmParams;

/// Closed set of runnable instances.
#[derive(Debug, Clone)]
pub enum AnyInstance {
    Container(ContainerInstance),
    Pipe(PipeInstance),
    Prebuilt(PrebuiltInstance),
    PersistentWorker(PersistentWorker),
}

impl AnyInstance {
    fn inner(&self) -> &dyn Instance {
        match self {
            AnyInstance::Container(i) => i,
            AnyInstance::Pipe(i) => i,
            AnyInstance::Prebuilt(i) => i,
            AnyInstance::PersistentWorker(i) => i,
        }
    }
}

#[async_trait]
impl Instance for AnyInstance {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
        self.inner().run(cancel, config).await
    }

    fn working_directory(&self, project_dir: &Path, dirty_mode: bool) -> String {
        self.inner().working_directory(project_dir, dirty_mode)
    }
}

/// Pick the instance for a task from its backend-selection payload.
///
/// Every check that can fail happens here, before anything is provisioned.
pub fn select(
    payload: Option<&InstancePayload>,
    commands: &[Command],
    custom_working_dir: &str,
) -> Result<AnyInstance, InstanceError> {
    let Some(payload) = payload else {
        return Err(InstanceError::FailedToCreate(
            "got no instance, it's probably not supported by this runner".into(),
        ));
    };

    let descriptor = InstanceDescriptor::decode(payload).map_err(|e| match e {
        ModelError::UnknownInstanceKind(kind) => InstanceError::Unsupported(kind),
        other => InstanceError::FailedToCreate(format!("failed to decode task's instance: {other}")),
    })?;
    debug!(kind = descriptor.kind(), "instance decoded");

    let instance = match descriptor {
        InstanceDescriptor::Container(c) => {
            let platform = match c.platform {
                PlatformKind::Linux => Platform::unix(),
                PlatformKind::Windows => Platform::windows(c.os_version),
                other => {
                    return Err(InstanceError::FailedToCreate(format!(
                        "unsupported container instance platform: {other}"
                    )));
                }
            };
            AnyInstance::Container(ContainerInstance {
                image: c.image,
                cpu: c.cpu,
                memory: c.memory,
                additional_containers: c.additional_containers,
                platform,
                custom_working_dir: custom_working_dir.to_string(),
            })
        }
        InstanceDescriptor::Pipe(p) => AnyInstance::Pipe(PipeInstance {
            cpu: p.cpu,
            memory: p.memory,
            stages: pipe_stages(commands)?,
            custom_working_dir: custom_working_dir.to_string(),
        }),
        InstanceDescriptor::PrebuiltImage(p) => AnyInstance::Prebuilt(PrebuiltInstance {
            image: PrebuiltInstance::image_name(&p.repository, &p.reference),
            dockerfile: p.dockerfile,
            arguments: p.arguments,
        }),
        InstanceDescriptor::PersistentWorker(pw) => {
            AnyInstance::PersistentWorker(PersistentWorker::new(worker_isolation(pw.isolation)))
        }
        InstanceDescriptor::DockerBuilder(db) => {
            if !db.platform.as_str().eq_ignore_ascii_case(host_os()) {
                return Err(InstanceError::FailedToCreate(format!(
                    "cannot run {} Docker Builder instance on this platform",
                    db.platform.title()
                )));
            }
            AnyInstance::PersistentWorker(PersistentWorker::new(WorkerIsolation::None))
        }
    };
    Ok(instance)
}

fn worker_isolation(isolation: Option<Isolation>) -> WorkerIsolation {
    match isolation {
        None | Some(Isolation::None) => WorkerIsolation::None,
        Some(Isolation::Parallels(p)) => WorkerIsolation::Parallels(VmParams::new(
            p.image,
            ShellCredentials {
                user: p.user,
                password: p.password,
            },
            p.platform,
        )),
        Some(Isolation::Container(c)) => WorkerIsolation::Container {
            image: c.image,
            cpu: c.cpu,
            memory: c.memory,
        },
    }
}
