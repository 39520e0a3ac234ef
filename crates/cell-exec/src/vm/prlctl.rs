//! Parallels Desktop VMs driven through the `prlctl` CLI.
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use cell_core::backend::{Vm, VmBackend, VmError};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Leases handed out by Parallels' shared-network DHCP server.
pub const DHCP_LEASES_PATH: &str = "/Library/Preferences/Parallels/parallels_dhcp_leases";

/// VM backend cloning linked clones with `prlctl`.
#[derive(Debug, Clone)]
pub struct Prlctl {
    leases_path: PathBuf,
}

impl Default for Prlctl {
    fn default() -> Self {
        Self {
            leases_path: PathBuf::from(DHCP_LEASES_PATH),
        }
    }
}

#[async_trait]
impl VmBackend for Prlctl {
    #[instrument(skip(self))]
    async fn clone_template(&self, template: &str) -> Result<Box<dyn Vm>, VmError> {
        let name = format!("cirrus-{}", Uuid::new_v4().simple());
        run_prlctl("clone", &["clone", template, "--name", &name, "--linked"]).await?;

        let vm = PrlVm {
            name,
            leases_path: self.leases_path.clone(),
        };
        if let Err(e) = run_prlctl("start", &["start", &vm.name]).await {
            if let Err(cleanup) = vm.close().await {
                debug!(vm = %vm.name, error = %cleanup, "failed to delete clone that didn't start");
            }
            return Err(e);
        }
        debug!(vm = %vm.name, "clone started");
        Ok(Box::new(vm))
    }
}

struct PrlVm {
    name: String,
    leases_path: PathBuf,
}

#[async_trait]
impl Vm for PrlVm {
    fn ident(&self) -> &str {
        &self.name
    }

    async fn retrieve_ip(&self) -> Result<IpAddr, VmError> {
        let info = run_prlctl("list", &["list", "--info", "--json", &self.name]).await?;
        let mac = primary_mac(&info)?;
        let leases = read_leases(&self.leases_path).await?;
        lease_for(&leases, &mac).ok_or_else(|| VmError::NoAddress(self.name.clone()))
    }

    async fn close(&self) -> Result<(), VmError> {
        if let Err(e) = run_prlctl("stop", &["stop", &self.name, "--kill"]).await {
            debug!(vm = %self.name, error = %e, "failed to stop VM");
        }
        run_prlctl("delete", &["delete", &self.name]).await?;
        Ok(())
    }
}

async fn run_prlctl(op: &'static str, args: &[&str]) -> Result<String, VmError> {
    let output = tokio::process::Command::new("prlctl")
        .args(args)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(VmError::Operation {
            op,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

async fn read_leases(path: &Path) -> Result<String, VmError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| VmError::Parse(format!("{}: {e}", path.display())))
}

/// MAC address of the first network adapter, lowercase and without separators.
fn primary_mac(info: &str) -> Result<String, VmError> {
    let json: Value =
        serde_json::from_str(info).map_err(|e| VmError::Parse(format!("VM info: {e}")))?;
    let vm = match &json {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    vm.and_then(|vm| vm.pointer("/Hardware/net0/mac"))
        .and_then(Value::as_str)
        .map(normalize_mac)
        .ok_or_else(|| VmError::Parse("VM info has no net0 MAC address".into()))
}

fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Most recent lease for `mac` in a leases file.
///
/// Each line reads `<ip>="<issued>,<duration>,<mac>,<client-id>"`.
fn lease_for(leases: &str, mac: &str) -> Option<IpAddr> {
    leases
        .lines()
        .filter_map(|line| {
            let (ip, value) = line.trim().split_once('=')?;
            let mut fields = value.trim_matches('"').split(',');
            let issued: u64 = fields.next()?.trim().parse().ok()?;
            let _duration = fields.next()?;
            let lease_mac = normalize_mac(fields.next()?);
            let ip: IpAddr = ip.trim().parse().ok()?;
            (lease_mac == mac).then_some((issued, ip))
        })
        .max_by_key(|(issued, _)| *issued)
        .map(|(_, ip)| ip)
}
