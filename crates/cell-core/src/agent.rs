//! Agent invocation: command lines and binary lookup.
use std::{
    io,
    path::{Path, PathBuf},
};

use crate::instance::RunConfig;

/// Base name of the agent executable.
pub const AGENT_BINARY_NAME: &str = "cirrus-ci-agent";

/// Where the agent binary is uploaded inside a VM guest.
pub const VM_AGENT_PATH: &str = "/tmp/cirrus-ci-agent";

/// Argument vector for the agent running inside a container.
///
/// `command_from`/`command_to` narrow execution to a window of the task's
/// commands; an empty bound means "from the start"/"to the end".
pub fn container_command(
    agent_path: &str,
    config: &RunConfig,
    command_from: &str,
    command_to: &str,
) -> Vec<String> {
    let mut argv = base_args(
        agent_path,
        config.container_endpoint(),
        config.server_secret().to_owned(),
        config.client_secret().to_owned(),
        config,
    );
    argv.extend([
        "-command-from".to_owned(),
        command_from.to_owned(),
        "-command-to".to_owned(),
        command_to.to_owned(),
    ]);
    argv
}

/// Shell input that runs the agent in an interactive shell and then exits it.
///
/// Secrets are double-quoted since they go through the shell's parser.
pub fn shell_command(agent_path: &str, config: &RunConfig) -> String {
    let argv = base_args(
        agent_path,
        config.direct_endpoint(),
        format!("\"{}\"", config.server_secret()),
        format!("\"{}\"", config.client_secret()),
        config,
    );
    format!("{}\nexit\n", argv.join(" "))
}

/// Argument vector for the agent running directly on the host.
pub fn host_command(agent_path: &str, config: &RunConfig) -> Vec<String> {
    base_args(
        agent_path,
        config.direct_endpoint(),
        config.server_secret().to_owned(),
        config.client_secret().to_owned(),
        config,
    )
}

fn base_args(
    agent_path: &str,
    endpoint: &str,
    server_token: String,
    client_token: String,
    config: &RunConfig,
) -> Vec<String> {
    vec![
        agent_path.to_owned(),
        "-api-endpoint".to_owned(),
        endpoint.to_owned(),
        "-server-token".to_owned(),
        server_token,
        "-client-token".to_owned(),
        client_token,
        "-task-id".to_owned(),
        config.task_id().to_string(),
    ]
}

/// File name of a released agent binary, e.g. `cirrus-ci-agent-v1.2.3-darwin-arm64`.
pub fn binary_name(version: &str, os: &str, arch: &str) -> String {
    let suffix = if os == "windows" { ".exe" } else { "" };
    format!("{AGENT_BINARY_NAME}-v{version}-{os}-{arch}{suffix}")
}

/// Path of the agent binary for `os`/`arch` in the configured agent directory.
pub fn local_binary_path(config: &RunConfig, os: &str, arch: &str) -> PathBuf {
    config
        .agent_dir()
        .join(binary_name(config.agent_version(), os, arch))
}

/// Read the agent binary for `os`/`arch` from the configured agent directory.
pub async fn load_binary(config: &RunConfig, os: &str, arch: &str) -> io::Result<Vec<u8>> {
    let path = local_binary_path(config, os, arch);
    tokio::fs::read(&path)
        .await
        .map_err(|e| annotate(e, &path))
}

fn annotate(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}
