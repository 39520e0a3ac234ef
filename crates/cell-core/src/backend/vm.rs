use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;

use super::VmError;

/// Factory of virtual machines cloned from template images.
#[async_trait]
pub trait VmBackend: Send + Sync + 'static {
    /// Clone `template` into a new, started VM owned by the caller.
    async fn clone_template(&self, template: &str) -> Result<Box<dyn Vm>, VmError>;
}

/// A cloned VM.
///
/// The owner must call [`Vm::close`] on every exit path; dropping the handle
/// does not destroy the clone.
#[async_trait]
pub trait Vm: Send + Sync {
    /// Name or identifier of the clone, used in error messages.
    fn ident(&self) -> &str;

    /// Address assigned to the VM by DHCP.
    ///
    /// Fails while the guest has not obtained a lease yet; callers retry.
    async fn retrieve_ip(&self) -> Result<IpAddr, VmError>;

    /// Stop and delete the clone.
    async fn close(&self) -> Result<(), VmError>;
}

/// Shared handle to a VM backend.
pub type VmBackendHandle = Arc<dyn VmBackend>;
