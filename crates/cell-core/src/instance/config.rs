use std::{
    fmt,
    path::{Path, PathBuf},
};

use cell_model::TaskId;

use crate::{
    backend::{BackendError, BackendHandle, ShellConnectorHandle, VmBackendHandle},
    error::InstanceError,
    options::ContainerOptions,
    report::{ReporterHandle, tracing_reporter},
};

/// Shared configuration for running a single task.
///
/// Immutable once built and passed by reference through the whole call chain.
/// Secrets and the task id never show up in `Debug`/`Display` output.
#[derive(Clone)]
pub struct RunConfig {
    container_endpoint: String,
    direct_endpoint: String,
    server_secret: String,
    client_secret: String,
    task_id: TaskId,
    project_dir: PathBuf,
    dirty_mode: bool,
    backend: Option<BackendHandle>,
    vm_backend: Option<VmBackendHandle>,
    shell: Option<ShellConnectorHandle>,
    container_options: ContainerOptions,
    reporter: ReporterHandle,
    agent_version: String,
    agent_dir: PathBuf,
}

impl RunConfig {
    /// Create a configuration for the given agent endpoint and credentials.
    ///
    /// The same endpoint is used for containerized and direct (VM/host) agents
    /// until [`RunConfig::with_direct_endpoint`] says otherwise.
    pub fn new(
        endpoint: impl Into<String>,
        server_secret: impl Into<String>,
        client_secret: impl Into<String>,
        task_id: TaskId,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            direct_endpoint: endpoint.clone(),
            container_endpoint: endpoint,
            server_secret: server_secret.into(),
            client_secret: client_secret.into(),
            task_id,
            project_dir: PathBuf::from("."),
            dirty_mode: false,
            backend: None,
            vm_backend: None,
            shell: None,
            container_options: ContainerOptions::default(),
            reporter: tracing_reporter(),
            agent_version: String::new(),
            agent_dir: PathBuf::from("."),
        }
    }

    /// Endpoint agents outside of containers (VMs, host) call back to.
    pub fn with_direct_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.direct_endpoint = endpoint.into();
        self
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Bind-mount the project directory instead of copying it into a volume.
    pub fn with_dirty_mode(mut self, dirty: bool) -> Self {
        self.dirty_mode = dirty;
        self
    }

    pub fn with_backend(mut self, backend: BackendHandle) -> Self {
        self.backend = Some(backend);
        self
    }

    /// VM backend and remote shell used by VM isolation.
    pub fn with_vm(mut self, vm_backend: VmBackendHandle, shell: ShellConnectorHandle) -> Self {
        self.vm_backend = Some(vm_backend);
        self.shell = Some(shell);
        self
    }

    pub fn with_container_options(mut self, options: ContainerOptions) -> Self {
        self.container_options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = reporter;
        self
    }

    /// Agent version plus the directory holding prebuilt agent binaries for it.
    pub fn with_agent(mut self, version: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.agent_version = version.into();
        self.agent_dir = dir.into();
        self
    }

    pub fn container_endpoint(&self) -> &str {
        &self.container_endpoint
    }

    pub fn direct_endpoint(&self) -> &str {
        &self.direct_endpoint
    }

    pub fn server_secret(&self) -> &str {
        &self.server_secret
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn dirty_mode(&self) -> bool {
        self.dirty_mode
    }

    pub fn container_options(&self) -> &ContainerOptions {
        &self.container_options
    }

    pub fn reporter(&self) -> &ReporterHandle {
        &self.reporter
    }

    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    /// The container backend, required by container-based instances.
    pub fn container_backend(&self) -> Result<&BackendHandle, InstanceError> {
        self.backend.as_ref().ok_or_else(|| {
            BackendError::Unavailable("no container backend configured".into()).into()
        })
    }
}

impl RunConfig {
    pub fn vm_backend(&self) -> Option<&VmBackendHandle> {
        self.vm_backend.as_ref()
    }

    pub fn shell_connector(&self) -> Option<&ShellConnectorHandle> {
        self.shell.as_ref()
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("container_endpoint", &self.container_endpoint)
            .field("direct_endpoint", &self.direct_endpoint)
            .field("server_secret", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .field("project_dir", &self.project_dir)
            .field("dirty_mode", &self.dirty_mode)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("vm_backend", &self.vm_backend.is_some())
            .field("container_options", &self.container_options)
            .field("agent_version", &self.agent_version)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunConfig(project_dir={}, dirty_mode={})",
            self.project_dir.display(),
            self.dirty_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PullPolicy;

    fn config() -> RunConfig {
        RunConfig::new("http://127.0.0.1:8080", "server-s3cret", "client-s3cret", 424242)
    }

    #[test]
    fn direct_endpoint_defaults_to_container_endpoint() {
        let cfg = config();
        assert_eq!(cfg.direct_endpoint(), "http://127.0.0.1:8080");

        let cfg = cfg.with_direct_endpoint("http://10.0.0.1:8080");
        assert_eq!(cfg.container_endpoint(), "http://127.0.0.1:8080");
        assert_eq!(cfg.direct_endpoint(), "http://10.0.0.1:8080");
    }

    #[test]
    fn debug_and_display_hide_secrets_and_task_id() {
        let cfg = config();
        for s in [format!("{cfg:?}"), cfg.to_string()] {
            assert!(!s.contains("s3cret"), "secret leaked: {s}");
            assert!(!s.contains("424242"), "task id leaked: {s}");
        }
    }

    #[test]
    fn missing_backend_is_an_error() {
        let err = config().container_backend().err().unwrap();
        assert!(matches!(err, InstanceError::Backend(BackendError::Unavailable(_))));
    }

    #[test]
    fn builders_replace_fields() {
        let cfg = config()
            .with_project_dir("/src")
            .with_dirty_mode(true)
            .with_container_options(ContainerOptions {
                pull_policy: PullPolicy::Never,
                no_cleanup: true,
            })
            .with_agent("1.2.3", "/opt/agents");

        assert_eq!(cfg.project_dir(), Path::new("/src"));
        assert!(cfg.dirty_mode());
        assert!(cfg.container_options().no_cleanup);
        assert_eq!(cfg.agent_version(), "1.2.3");
        assert_eq!(cfg.agent_dir(), Path::new("/opt/agents"));
    }
}
