//! Agent running directly on the host, without any isolation.
use std::process::Stdio;

use cell_core::{
    InstanceError, RunConfig, agent,
    platform::{host_arch, host_os},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const ISOLATION: &str = "None";

/// Spawn the agent for the host OS/arch in the project directory and wait for it.
///
/// Output lines go to the reporter. A non-zero exit fails the task;
/// cancellation kills the process.
#[instrument(name = "host", skip_all)]
pub async fn run_on_host(cancel: &CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
    let path = agent::local_binary_path(config, host_os(), host_arch());
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(InstanceError::isolation(
            ISOLATION,
            format!("agent binary {} not found", path.display()),
        ));
    }

    let argv = agent::host_command(&path.to_string_lossy(), config);
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(config.project_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(agent = %path.display(), cwd = %config.project_dir().display(), "spawning agent");
    let mut child = cmd
        .spawn()
        .map_err(|e| InstanceError::isolation(ISOLATION, format!("failed to start agent: {e}")))?;

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(forward_lines(stdout, config.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(forward_lines(stderr, config.clone())));
    }

    let result = tokio::select! {
        res = child.wait() => {
            let status = res.map_err(|e| {
                InstanceError::isolation(ISOLATION, format!("failed to wait for agent: {e}"))
            })?;
            match status.code() {
                Some(0) => Ok(()),
                Some(code) => Err(InstanceError::isolation(
                    ISOLATION,
                    format!("agent exited with code {code}"),
                )),
                None => Err(InstanceError::isolation(ISOLATION, "agent terminated by signal")),
            }
        }
        _ = cancel.cancelled() => {
            debug!("cancellation requested; killing agent");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "failed to kill agent");
            }
            Err(InstanceError::Canceled)
        }
    };

    for f in forwarders {
        let _ = f.await;
    }
    result
}

async fn forward_lines<R>(reader: R, config: RunConfig)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        config.reporter().container_log("agent", &line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_agent_fails_isolation() {
        let config = RunConfig::new("http://127.0.0.1:8080", "s", "c", 1)
            .with_agent("0.0.0", "/nonexistent-agent-dir");

        let err = run_on_host(&CancellationToken::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, InstanceError::IsolationFailed { isolation: "None", .. }));
    }

    #[cfg(unix)]
    mod unix {
        use std::{os::unix::fs::PermissionsExt, path::Path, sync::Arc};

        use super::*;
        use crate::testing::RecordingReporter;

        async fn fake_agent(dir: &Path, script: &str) -> RunConfig {
            let path = dir.join(agent::binary_name("9.9.9", host_os(), host_arch()));
            tokio::fs::write(&path, format!("#!/bin/sh\n{script}\n"))
                .await
                .unwrap();
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .unwrap();
            RunConfig::new("http://127.0.0.1:8080", "s", "c", 1)
                .with_agent("9.9.9", dir)
                .with_project_dir(dir)
        }

        fn scratch(name: &str) -> std::path::PathBuf {
            let dir = std::env::temp_dir().join(format!("cell-exec-{name}-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        #[tokio::test]
        async fn forwards_output_and_succeeds() {
            let dir = scratch("ok");
            let reporter = Arc::new(RecordingReporter::default());
            let config = fake_agent(&dir, "echo \"args: $*\"")
                .await
                .with_reporter(reporter.clone());

            run_on_host(&CancellationToken::new(), &config).await.unwrap();

            let logs = reporter.entries();
            assert!(logs.iter().any(|l| l.contains("-api-endpoint http://127.0.0.1:8080")));
        }

        #[tokio::test]
        async fn non_zero_exit_fails() {
            let dir = scratch("fail");
            let config = fake_agent(&dir, "exit 3").await;

            let err = run_on_host(&CancellationToken::new(), &config)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("exited with code 3"));
        }

        #[tokio::test]
        async fn cancellation_kills_agent() {
            let dir = scratch("cancel");
            let config = fake_agent(&dir, "exec sleep 30").await;
            let cancel = CancellationToken::new();
            cancel.cancel();

            let err = run_on_host(&cancel, &config).await.unwrap_err();
            assert!(matches!(err, InstanceError::Canceled));
        }
    }
}
