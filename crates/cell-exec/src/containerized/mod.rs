//! Main task container plus sidecars, with ordered teardown.
//!
//! Lifetimes of the parts of one run:
//! - sidecars live in their own cancellation scope, rooted independently of
//!   the caller, and are stopped only by teardown;
//! - the log reader is a child of the caller's token;
//! - teardown always runs in the order sidecars, main container, log reader.
mod additional;

use std::path::Path;

use cell_core::{
    InstanceError, Platform, RunConfig, agent,
    backend::{ContainerCreateInput, ContainerMount, ContainerResources},
    clamp,
};
use cell_model::{AdditionalContainer, MebiBytes};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, instrument, warn};

use crate::pull::pull_if_needed;
use additional::Sidecar;

/// Comma-separated sidecar ports the agent waits for before running scripts.
pub const PORTS_WAIT_FOR_ENV: &str = "CIRRUS_PORTS_WAIT_FOR";

/// Network the Cloud Build workers attach their step containers to.
const CLOUD_BUILD_NETWORK: &str = "cloudbuild";

/// What to run in the main container and next to it.
#[derive(Debug, Clone)]
pub struct ContainerParams {
    pub image: String,
    pub cpu: f32,
    pub memory: MebiBytes,
    pub additional_containers: Vec<AdditionalContainer>,
    pub command_from: String,
    pub command_to: String,
    pub platform: Platform,
    pub agent_volume: String,
    pub working_volume: String,
    pub working_directory: String,
}

/// Run the agent in a fresh container next to the declared sidecars.
///
/// Resolves once the main container has stopped (any exit code), the backend
/// fails, a sidecar fails or `cancel` fires. Everything created here has been
/// removed (or reported as left behind) by the time this returns.
#[instrument(
    name = "containerized",
    skip_all,
    fields(image = %params.image, backend = tracing::field::Empty)
)]
pub async fn run_containerized(
    cancel: &CancellationToken,
    config: &RunConfig,
    mut params: ContainerParams,
) -> Result<(), InstanceError> {
    let backend = config.container_backend()?.clone();
    Span::current().record("backend", backend.name());
    let reporter = config.reporter().clone();
    let options = config.container_options();

    let info = backend.system_info().await?;
    let available_cpu = info.total_cpus as f32;
    let available_memory = clamp::available_memory(info.total_memory_bytes);
    params.cpu = clamp::clamp_cpu(params.cpu, available_cpu);
    params.memory = clamp::clamp_memory(params.memory, available_memory);
    for ac in &mut params.additional_containers {
        ac.cpu = clamp::clamp_cpu(ac.cpu, available_cpu);
        ac.memory = clamp::clamp_memory(ac.memory, available_memory);
    }

    tokio::select! {
        res = pull_if_needed(backend.as_ref(), options, &params.image) => res?,
        _ = cancel.cancelled() => return Err(InstanceError::Canceled),
    }

    debug!(volume = %params.working_volume, "creating main container");
    let input = main_create_input(config, &params, provider_network());
    let main_id = backend.container_create(&input, None).await?;

    if let Some(ac) = params
        .additional_containers
        .iter()
        .find(|ac| ac.maps_host_ports())
    {
        reporter.port_mapping_unsupported(&ac.name);
    }

    let sidecar_scope = CancellationToken::new();
    let (err_tx, mut err_rx) = mpsc::channel(params.additional_containers.len().max(1));
    let mut sidecars = Vec::with_capacity(params.additional_containers.len());
    for spec in std::mem::take(&mut params.additional_containers) {
        let sidecar = Sidecar {
            backend: backend.clone(),
            reporter: reporter.clone(),
            options: options.clone(),
            spec,
            main_id: main_id.clone(),
        };
        let scope = sidecar_scope.clone();
        let err_tx = err_tx.clone();
        sidecars.push(tokio::spawn(async move {
            if let Err(e) = sidecar.run(scope).await {
                let _ = err_tx.send(e).await;
            }
        }));
    }
    drop(err_tx);

    let log_scope = cancel.child_token();
    let mut log_reader: Option<JoinHandle<()>> = None;

    let outcome: Result<(), InstanceError> = async {
        debug!(container = %main_id, "starting main container");
        backend.container_start(&main_id).await?;

        let mut lines = backend.container_logs(&main_id, log_scope.clone()).await?;
        let log_reporter = reporter.clone();
        let log_id = main_id.clone();
        log_reader = Some(tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                log_reporter.container_log(&log_id, &line);
            }
        }));

        debug!(container = %main_id, "waiting for main container to finish");
        tokio::select! {
            res = backend.container_wait(&main_id) => {
                let res = res?;
                debug!(status = res.status_code, error = ?res.error, "main container exited");
                Ok(())
            }
            Some(err) = err_rx.recv() => Err(err),
            _ = cancel.cancelled() => Err(InstanceError::Canceled),
        }
    }
    .await;

    // Sidecars first: the backend refuses to remove a container whose
    // namespace is still shared.
    sidecar_scope.cancel();
    for handle in sidecars {
        if let Err(e) = handle.await {
            warn!(error = %e, "additional container task aborted");
        }
    }

    if options.no_cleanup {
        reporter.cleanup_skipped("container", &main_id);
    } else {
        debug!(container = %main_id, "cleaning up main container");
        if let Err(e) = backend.container_delete(&main_id).await {
            reporter.cleanup_failed("container", &main_id, &e.to_string());
        }
    }

    debug!("waiting for the container log reader to finish");
    log_scope.cancel();
    if let Some(handle) = log_reader {
        let _ = handle.await;
    }

    outcome
}

fn main_create_input(
    config: &RunConfig,
    params: &ContainerParams,
    network: Option<String>,
) -> ContainerCreateInput {
    let mut input = ContainerCreateInput {
        image: params.image.clone(),
        entrypoint: agent::container_command(
            &params.platform.container_agent_path(),
            config,
            &params.command_from,
            &params.command_to,
        ),
        mounts: vec![ContainerMount::volume(
            &params.agent_volume,
            params.platform.container_agent_volume_dir(),
        )],
        resources: ContainerResources {
            nano_cpus: clamp::nano_cpus(params.cpu),
            memory_bytes: clamp::memory_bytes(params.memory),
        },
        ..Default::default()
    };

    if cfg!(target_os = "linux") {
        input.network = network;
        // The agent talks to a Unix socket and reads bind-mounted sources,
        // both of which SELinux labeling blocks.
        input.disable_selinux = true;
    }

    if let Some(socket) = config.container_endpoint().strip_prefix("unix:") {
        if let Some(dir) = Path::new(socket).parent() {
            let dir = dir.to_string_lossy().into_owned();
            input.mounts.push(ContainerMount::bind(dir.clone(), dir));
        }
    }

    if config.dirty_mode() {
        input.mounts.push(ContainerMount::bind(
            config.project_dir().to_string_lossy(),
            &params.working_directory,
        ));
    } else {
        input.mounts.push(ContainerMount::volume(
            &params.working_volume,
            &params.working_directory,
        ));
    }

    if !params.additional_containers.is_empty() {
        input
            .env
            .insert(PORTS_WAIT_FOR_ENV, ports_wait_for(&params.additional_containers));
    }

    input
}

fn ports_wait_for(containers: &[AdditionalContainer]) -> String {
    containers
        .iter()
        .flat_map(|ac| ac.ports.iter())
        .map(|p| p.container_port.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Network to attach the main container to when running inside Cloud Build.
fn provider_network() -> Option<String> {
    std::env::var_os("BUILDER_OUTPUT").map(|_| CLOUD_BUILD_NETWORK.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cell_core::{ContainerOptions, PullPolicy, backend::MountKind};
    use cell_model::PortMapping;

    use super::*;
    use crate::testing::{FakeBackend, RecordingReporter, WaitMode, run_config};

    fn params(sidecars: Vec<AdditionalContainer>) -> ContainerParams {
        ContainerParams {
            image: "main".into(),
            cpu: 2.0,
            memory: 4096,
            additional_containers: sidecars,
            command_from: "build".into(),
            command_to: "deploy".into(),
            platform: Platform::unix(),
            agent_volume: "cirrus-agent-1".into(),
            working_volume: "cirrus-working-1".into(),
            working_directory: "/tmp/cirrus-ci/working-dir".into(),
        }
    }

    fn sidecar(image: &str, ports: &[(u32, u32)]) -> AdditionalContainer {
        AdditionalContainer {
            name: image.into(),
            image: image.into(),
            cpu: 1.0,
            memory: 512,
            ports: ports
                .iter()
                .map(|&(container_port, host_port)| PortMapping {
                    container_port,
                    host_port,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<FakeBackend>, Arc<RecordingReporter>, RunConfig) {
        let backend = FakeBackend::new();
        let reporter = Arc::new(RecordingReporter::default());
        let config = run_config(&backend, &reporter);
        (backend, reporter, config)
    }

    fn assert_teardown_order(backend: &FakeBackend, sidecars: &[&str]) {
        let main_delete = backend.position("delete:main");
        for s in sidecars {
            assert!(
                backend.position(&format!("delete:{s}")) < main_delete,
                "sidecar {s} must be removed before the main container: {:?}",
                backend.events()
            );
        }
        assert!(main_delete < backend.position("logs-stopped:main"));
    }

    #[tokio::test]
    async fn main_container_gets_agent_entrypoint_and_mounts() {
        let (backend, _reporter, config) = setup();

        run_containerized(&CancellationToken::new(), &config, params(vec![]))
            .await
            .unwrap();

        let input = &backend.inputs_for("main")[0];
        assert_eq!(input.entrypoint[0], "/tmp/cirrus-ci-agent/cirrus-ci-agent");
        assert_eq!(input.entrypoint[1..3], ["-api-endpoint", "http://127.0.0.1:8080"]);
        assert_eq!(input.entrypoint[9..], ["-command-from", "build", "-command-to", "deploy"]);
        assert_eq!(
            input.mounts,
            [
                ContainerMount::volume("cirrus-agent-1", "/tmp/cirrus-ci-agent"),
                ContainerMount::volume("cirrus-working-1", "/tmp/cirrus-ci/working-dir"),
            ]
        );
        assert!(input.env.get(PORTS_WAIT_FOR_ENV).is_none());
        assert_eq!(input.disable_selinux, cfg!(target_os = "linux"));
    }

    #[tokio::test]
    async fn dirty_mode_and_unix_socket_use_bind_mounts() {
        let (backend, reporter, _) = setup();
        let config = RunConfig::new("unix:/var/run/cirrus/rpc.sock", "s", "c", 1)
            .with_backend(backend.clone())
            .with_reporter(reporter.clone())
            .with_project_dir("/home/ci/project")
            .with_dirty_mode(true);

        run_containerized(&CancellationToken::new(), &config, params(vec![]))
            .await
            .unwrap();

        let mounts = &backend.inputs_for("main")[0].mounts;
        assert!(mounts.contains(&ContainerMount::bind("/var/run/cirrus", "/var/run/cirrus")));
        assert!(mounts.contains(&ContainerMount::bind(
            "/home/ci/project",
            "/tmp/cirrus-ci/working-dir"
        )));
        assert!(!mounts.iter().any(|m| m.source == "cirrus-working-1"));
        assert_eq!(mounts.iter().filter(|m| m.kind == MountKind::Volume).count(), 1);
    }

    #[tokio::test]
    async fn quotas_are_clamped_to_host_capacity() {
        let backend = FakeBackend::with_capacity(2, 1024);
        backend.set_wait("main", WaitMode::ExitAfter(&["wait:redis"]));
        let reporter = Arc::new(RecordingReporter::default());
        let config = run_config(&backend, &reporter);
        let mut p = params(vec![sidecar("redis", &[])]);
        p.cpu = 8.0;
        p.additional_containers[0].memory = 8192;

        run_containerized(&CancellationToken::new(), &config, p)
            .await
            .unwrap();

        let main = &backend.inputs_for("main")[0];
        assert_eq!(main.resources.nano_cpus, 2_000_000_000);
        assert_eq!(main.resources.memory_bytes, 1024 * 1024 * 1024);
        let redis = &backend.inputs_for("redis")[0];
        assert_eq!(redis.resources.memory_bytes, 1024 * 1024 * 1024);
    }

    #[tokio::test]
    async fn ports_are_aggregated_in_declaration_order() {
        let (backend, _reporter, config) = setup();
        backend.set_wait("main", WaitMode::ExitAfter(&["wait:nginx", "wait:api"]));
        let p = params(vec![
            sidecar("nginx", &[(80, 0), (443, 0)]),
            sidecar("api", &[(8080, 0)]),
        ]);

        run_containerized(&CancellationToken::new(), &config, p)
            .await
            .unwrap();

        let main = &backend.inputs_for("main")[0];
        assert_eq!(main.env.get(PORTS_WAIT_FOR_ENV), Some("80,443,8080"));
        assert_eq!(
            backend.inputs_for("api")[0].network,
            Some(format!("container:{}", backend.id_of("main")))
        );
    }

    #[tokio::test]
    async fn sidecars_without_ports_still_set_the_variable() {
        let (backend, _reporter, config) = setup();

        run_containerized(&CancellationToken::new(), &config, params(vec![sidecar("worker", &[])]))
            .await
            .unwrap();

        assert_eq!(backend.inputs_for("main")[0].env.get(PORTS_WAIT_FOR_ENV), Some(""));
    }

    #[tokio::test]
    async fn one_port_mapping_warning_for_the_whole_set() {
        let (_backend, reporter, config) = setup();
        let p = params(vec![
            sidecar("mysql", &[(3306, 3306)]),
            sidecar("redis", &[(6379, 6379), (6380, 6380)]),
            sidecar("memcached", &[(11211, 0)]),
        ]);

        run_containerized(&CancellationToken::new(), &config, p)
            .await
            .unwrap();

        assert_eq!(reporter.entries().iter().filter(|e| e.starts_with("port:")).count(), 1);
        assert_eq!(reporter.count("port:mysql"), 1);
    }

    #[tokio::test]
    async fn teardown_order_after_success() {
        let (backend, reporter, config) = setup();
        backend.set_wait("main", WaitMode::ExitAfter(&["wait:redis", "wait:postgres"]));
        backend.set_wait("redis", WaitMode::Block);
        backend.set_wait("postgres", WaitMode::Block);
        let p = params(vec![sidecar("redis", &[]), sidecar("postgres", &[])]);

        run_containerized(&CancellationToken::new(), &config, p)
            .await
            .unwrap();

        assert_teardown_order(&backend, &["redis", "postgres"]);
        assert!(reporter.count("log:") >= 1);
    }

    #[tokio::test]
    async fn teardown_order_after_backend_error() {
        let (backend, _reporter, config) = setup();
        backend.set_wait("main", WaitMode::FailAfter(&["wait:redis"], "daemon went away"));
        backend.set_wait("redis", WaitMode::Block);

        let err = run_containerized(&CancellationToken::new(), &config, params(vec![sidecar("redis", &[])]))
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::Backend(_)));
        assert_teardown_order(&backend, &["redis"]);
    }

    #[tokio::test]
    async fn sidecar_failure_ends_the_run() {
        let (backend, _reporter, config) = setup();
        backend.set_wait("main", WaitMode::Block);
        backend.set_wait("redis", WaitMode::Block);
        backend.fail("start", "broken");
        let p = params(vec![sidecar("redis", &[]), sidecar("broken", &[])]);

        let err = run_containerized(&CancellationToken::new(), &config, p)
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::AdditionalContainerFailed(_)));
        assert!(backend.has("wait-dropped:main"));
        assert_teardown_order(&backend, &["broken"]);
        if backend.has("create:redis") {
            assert!(backend.position("delete:redis") < backend.position("delete:main"));
        }
    }

    #[tokio::test]
    async fn main_exit_code_is_not_a_failure() {
        let (backend, _reporter, config) = setup();
        backend.set_wait("main", WaitMode::Exit(1));

        let res = run_containerized(&CancellationToken::new(), &config, params(vec![])).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn caller_cancellation_leaves_sidecars_to_teardown() {
        let (backend, _reporter, config) = setup();
        backend.set_wait("main", WaitMode::Block);
        backend.set_wait("redis", WaitMode::Block);
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_containerized(&cancel, &config, params(vec![sidecar("redis", &[])])).await
            })
        };
        backend.until("wait:main").await;
        backend.until("wait:redis").await;

        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, InstanceError::Canceled));

        // The sidecar kept running past the caller's cancellation and was
        // only stopped once teardown began.
        let main_dropped = backend.position("wait-dropped:main");
        let side_dropped = backend.position("wait-dropped:redis");
        assert!(main_dropped < side_dropped);
        assert!(side_dropped < backend.position("delete:redis"));
        assert!(backend.position("delete:redis") < backend.position("delete:main"));
    }

    #[tokio::test]
    async fn no_cleanup_reports_every_container() {
        let backend = FakeBackend::new();
        backend.set_wait("main", WaitMode::ExitAfter(&["wait:redis"]));
        let reporter = Arc::new(RecordingReporter::default());
        let config = run_config(&backend, &reporter).with_container_options(ContainerOptions {
            pull_policy: PullPolicy::Never,
            no_cleanup: true,
        });

        run_containerized(&CancellationToken::new(), &config, params(vec![sidecar("redis", &[])]))
            .await
            .unwrap();

        assert_eq!(backend.count("delete:"), 0);
        assert_eq!(backend.count("pull:"), 0);
        assert_eq!(reporter.count("skipped:container"), 1);
        assert_eq!(reporter.count("skipped:additional container"), 1);
    }

    #[tokio::test]
    async fn delete_failure_does_not_mask_the_outcome() {
        let (backend, reporter, config) = setup();
        backend.fail("delete", "main");

        run_containerized(&CancellationToken::new(), &config, params(vec![]))
            .await
            .unwrap();

        assert_eq!(reporter.count("cleanup-failed:container"), 1);
    }

    #[tokio::test]
    async fn main_pull_failure_creates_nothing() {
        let (backend, _reporter, config) = setup();
        backend.fail("pull", "main");

        let err = run_containerized(&CancellationToken::new(), &config, params(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::AdditionalContainerFailed(_)));
        assert_eq!(backend.count("create:"), 0);
    }
}
