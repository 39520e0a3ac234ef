//! Container backend driving the `docker` CLI.
use std::process::Stdio;

use async_trait::async_trait;
use cell_core::backend::{
    BackendError, ContainerBackend, ContainerCreateInput, ImageBuildInput, MountKind, SystemInfo,
    WaitResult,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const LOG_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".into(),
        }
    }
}

impl DockerCli {
    async fn run(&self, op: &'static str, args: &[String]) -> Result<String, BackendError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to exec {}: {e}", self.binary)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(BackendError::op(
                op,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_info(out: &str) -> Result<SystemInfo, BackendError> {
    let mut fields = out.split_whitespace();
    let mut next = |what: &str| {
        fields
            .next()
            .ok_or_else(|| BackendError::Parse(format!("docker info: missing {what} in {out:?}")))
    };
    let cpus = next("NCPU")?;
    let memory = next("MemTotal")?;
    Ok(SystemInfo {
        total_cpus: cpus
            .parse()
            .map_err(|e| BackendError::Parse(format!("NCPU {cpus:?}: {e}")))?,
        total_memory_bytes: memory
            .parse()
            .map_err(|e| BackendError::Parse(format!("MemTotal {memory:?}: {e}")))?,
    })
}

/// One `key=value` field of a `--mount` value, which docker parses as CSV.
fn mount_field(key: &str, value: &str) -> String {
    let field = format!("{key}={value}");
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field
    }
}

/// Arguments of `docker create` for `input`.
fn create_args(input: &ContainerCreateInput, name: Option<&str>) -> Vec<String> {
    let mut argv = vec!["create".to_string()];
    if let Some(name) = name {
        argv.extend(["--name".into(), name.into()]);
    }
    if let Some(entrypoint) = input.entrypoint.first() {
        argv.extend(["--entrypoint".into(), entrypoint.clone()]);
    }
    for (key, value) in input.env.iter() {
        argv.extend(["--env".into(), format!("{key}={value}")]);
    }
    for mount in &input.mounts {
        let kind = match mount.kind {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
        };
        let spec = [
            mount_field("type", kind),
            mount_field("source", &mount.source),
            mount_field("target", &mount.target),
        ];
        argv.extend(["--mount".into(), spec.join(",")]);
    }
    if input.resources.nano_cpus > 0 {
        let cpus = input.resources.nano_cpus as f64 / 1_000_000_000.0;
        argv.extend(["--cpus".into(), cpus.to_string()]);
    }
    if input.resources.memory_bytes > 0 {
        argv.extend(["--memory".into(), format!("{}b", input.resources.memory_bytes)]);
    }
    if let Some(network) = &input.network {
        argv.extend(["--network".into(), network.clone()]);
    }
    if input.disable_selinux {
        argv.extend(["--security-opt".into(), "label=disable".into()]);
    }

    argv.push(input.image.clone());
    argv.extend(input.entrypoint.iter().skip(1).cloned());
    argv.extend(input.command.iter().cloned());
    argv
}

#[async_trait]
impl ContainerBackend for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn system_info(&self) -> Result<SystemInfo, BackendError> {
        let out = self
            .run("info", &args(["info", "--format", "{{.NCPU}} {{.MemTotal}}"]))
            .await?;
        parse_info(&out)
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, BackendError> {
        match self.run("image inspect", &args(["image", "inspect", reference])).await {
            Ok(_) => Ok(true),
            Err(BackendError::Operation { reason, .. }) if reason.contains("No such") => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn image_pull(&self, reference: &str) -> Result<(), BackendError> {
        self.run("pull", &args(["pull", "--quiet", reference])).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tag = %input.tag))]
    async fn image_build(&self, input: &ImageBuildInput) -> Result<(), BackendError> {
        let mut argv = args(["build", "--tag", &input.tag]);
        if !input.dockerfile.is_empty() {
            argv.extend(["--file".into(), input.dockerfile.clone()]);
        }
        for (key, value) in &input.build_args {
            argv.extend(["--build-arg".into(), format!("{key}={value}")]);
        }
        argv.push(input.context_dir.to_string_lossy().into_owned());
        self.run("build", &argv).await?;
        Ok(())
    }

    async fn volume_create(&self, name: &str) -> Result<(), BackendError> {
        self.run("volume create", &args(["volume", "create", name])).await?;
        Ok(())
    }

    async fn volume_delete(&self, name: &str) -> Result<(), BackendError> {
        self.run("volume rm", &args(["volume", "rm", "--force", name])).await?;
        Ok(())
    }

    async fn container_create(
        &self,
        input: &ContainerCreateInput,
        name: Option<&str>,
    ) -> Result<String, BackendError> {
        let id = self.run("create", &create_args(input, name)).await?;
        if id.is_empty() {
            return Err(BackendError::Parse("docker create printed no container id".into()));
        }
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> Result<(), BackendError> {
        self.run("start", &args(["start", id])).await?;
        Ok(())
    }

    async fn container_wait(&self, id: &str) -> Result<WaitResult, BackendError> {
        let out = self.run("wait", &args(["wait", id])).await?;
        let status_code = out
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|e| BackendError::Parse(format!("docker wait {out:?}: {e}")))?;
        Ok(WaitResult {
            status_code,
            error: None,
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, BackendError> {
        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Unavailable(format!("failed to exec {}: {e}", self.binary)))?;

        let (tx, rx) = mpsc::channel(LOG_BUFFER);
        let stdout = child.stdout.take().map(|r| tokio::spawn(forward(r, tx.clone())));
        let stderr = child.stderr.take().map(|r| tokio::spawn(forward(r, tx)));
        let id = id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = child.wait() => {}
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        debug!(container = %id, error = %e, "failed to stop log follower");
                    }
                }
            }
            for task in stdout.into_iter().chain(stderr) {
                let _ = task.await;
            }
        });
        Ok(rx)
    }

    async fn container_delete(&self, id: &str) -> Result<(), BackendError> {
        self.run("rm", &args(["rm", "--force", "--volumes", id])).await?;
        Ok(())
    }
}

async fn forward<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
