//! Agent runs inside a VM cloned from a template.
//!
//! The remote shell client can't be cancelled by itself, so a monitor task
//! closes the connection once the run's scope ends; that is the only way
//! in-flight shell I/O gets interrupted.
#[cfg(feature = "parallels")]
mod prlctl;
#[cfg(feature = "parallels")]
pub use prlctl::{DHCP_LEASES_PATH, Prlctl};

#[cfg(feature = "parallels")]
mod ssh;
#[cfg(feature = "parallels")]
pub use ssh::SshConnector;

use std::{
    net::SocketAddr,
    sync::Arc,
};

use cell_core::{
    InstanceError, RunConfig,
    agent::{self, VM_AGENT_PATH},
    backend::{ShellClient, ShellConnector, ShellCredentials, Vm, VmBackend},
    platform::host_arch,
    retry::{RetryError, retry},
};
use cell_model::{PlatformKind, RetryStrategy};
use time::{OffsetDateTime, UtcOffset};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const ISOLATION: &str = "Parallels";

/// Which VM to clone and how to log into it.
#[derive(Debug, Clone)]
pub struct VmParams {
    pub image: String,
    pub credentials: ShellCredentials,
    /// Guest OS, selects the agent binary.
    pub platform: PlatformKind,
    pub ssh_port: u16,
    pub ip_retry: RetryStrategy,
}

impl VmParams {
    pub fn new(image: impl Into<String>, credentials: ShellCredentials, platform: PlatformKind) -> Self {
        Self {
            image: image.into(),
            credentials,
            platform,
            ssh_port: 22,
            ip_retry: RetryStrategy::default(),
        }
    }
}

/// Shell input that sets the guest clock (UTC) to `now`.
pub fn sync_command(now: OffsetDateTime) -> String {
    let t = now.to_offset(UtcOffset::UTC);
    format!(
        "sudo date -u {:02}{:02}{:02}{:02}{:04}\n",
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.year()
    )
}

fn failed(reason: String) -> InstanceError {
    InstanceError::isolation(ISOLATION, reason)
}

/// Clone a VM, run the agent in it over a login shell and destroy the clone.
///
/// The clone is closed on every path once it exists; closing failures are
/// reported, never returned.
#[instrument(name = "vm", skip_all, fields(image = %params.image))]
pub async fn run_in_vm(
    cancel: &CancellationToken,
    config: &RunConfig,
    params: &VmParams,
) -> Result<(), InstanceError> {
    let (Some(vms), Some(shell)) = (config.vm_backend(), config.shell_connector()) else {
        return Err(failed("no VM backend configured".into()));
    };

    let vm = vms
        .clone_template(&params.image)
        .await
        .map_err(|e| failed(format!("failed to create VM cloned from {:?}: {e}", params.image)))?;
    debug!(vm = vm.ident(), "VM cloned");

    let outcome = drive(cancel, config, params, vm.as_ref(), shell.as_ref()).await;

    if let Err(e) = vm.close().await {
        config.reporter().cleanup_failed("VM", vm.ident(), &e.to_string());
    }
    outcome
}

async fn drive(
    cancel: &CancellationToken,
    config: &RunConfig,
    params: &VmParams,
    vm: &dyn Vm,
    shell: &dyn ShellConnector,
) -> Result<(), InstanceError> {
    let ident = vm.ident().to_string();

    let ip = retry(&params.ip_retry, cancel, || vm.retrieve_ip())
        .await
        .map_err(|e| match e {
            RetryError::Canceled => InstanceError::Canceled,
            e @ RetryError::Exhausted { .. } => {
                failed(format!("failed to retrieve VM {ident:?} IP-address: {e}"))
            }
        })?;
    let addr = SocketAddr::new(ip, params.ssh_port);
    debug!(vm = %ident, %addr, "VM is reachable");

    let stream = tokio::select! {
        res = TcpStream::connect(addr) => res.map_err(|e| {
            failed(format!("failed to connect to the VM {ident:?} on SSH port: {e}"))
        })?,
        _ = cancel.cancelled() => return Err(InstanceError::Canceled),
    };
    let client = tokio::select! {
        res = shell.handshake(stream, addr, &params.credentials) => res.map_err(|e| {
            failed(format!("failed to connect to the VM {ident:?} via SSH: {e}"))
        })?,
        _ = cancel.cancelled() => return Err(InstanceError::Canceled),
    };

    let monitor_scope = cancel.child_token();
    let monitor = tokio::spawn(close_when_done(monitor_scope.clone(), client.clone()));

    let outcome = session(config, params, &ident, client.as_ref()).await;

    monitor_scope.cancel();
    let _ = monitor.await;

    if cancel.is_cancelled() {
        return Err(InstanceError::Canceled);
    }
    outcome
}

/// Closes `client` once `scope` ends, interrupting whatever it is doing.
async fn close_when_done(scope: CancellationToken, client: Arc<dyn ShellClient>) {
    scope.cancelled().await;
    client.close().await;
}

async fn session(
    config: &RunConfig,
    params: &VmParams,
    ident: &str,
    client: &dyn ShellClient,
) -> Result<(), InstanceError> {
    let binary = agent::load_binary(config, params.platform.as_str(), host_arch())
        .await
        .map_err(|e| failed(format!("failed to load agent binary for VM {ident:?}: {e}")))?;
    client
        .upload(VM_AGENT_PATH, &binary)
        .await
        .map_err(|e| failed(format!("failed to upload agent to the VM {ident:?} via SFTP: {e}")))?;

    let mut sess = client
        .open_login_shell()
        .await
        .map_err(|e| failed(format!("failed to start a shell on VM {ident:?}: {e}")))?;

    sess.write_stdin(sync_command(OffsetDateTime::now_utc()).as_bytes())
        .await
        .map_err(|e| failed(format!("failed to sync time on VM {ident:?}: {e}")))?;

    sess.write_stdin(agent::shell_command(VM_AGENT_PATH, config).as_bytes())
        .await
        .map_err(|e| failed(format!("failed to start agent on VM {ident:?}: {e}")))?;

    sess.wait()
        .await
        .map_err(|e| failed(format!("failed to run agent on VM {ident:?}: {e}")))
}
