//! In-memory collaborators for orchestrator tests.
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cell_core::{
    ContainerOptions, Reporter, RunConfig,
    backend::{
        BackendError, BackendHandle, ContainerBackend, ContainerCreateInput, ImageBuildInput,
        SystemInfo, WaitResult,
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How `container_wait` behaves for containers of a given image.
#[derive(Clone, Debug)]
pub enum WaitMode {
    Exit(i64),
    Block,
    Fail(&'static str),
    /// Exit with 0 once all of the given events have been recorded.
    ExitAfter(&'static [&'static str]),
    /// Fail once all of the given events have been recorded.
    FailAfter(&'static [&'static str], &'static str),
}

/// Container backend that records every call as `<op>:<image>`.
///
/// `wait-dropped:<image>` is recorded when a pending wait is abandoned and
/// `logs-stopped:<image>` when a log stream observes its cancellation.
pub struct FakeBackend {
    events: Arc<Mutex<Vec<String>>>,
    containers: Mutex<HashMap<String, ContainerCreateInput>>,
    next_id: AtomicUsize,
    info: SystemInfo,
    images: Mutex<HashSet<String>>,
    waits: Mutex<HashMap<String, WaitMode>>,
    failures: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(8, 16 * 1024)
    }

    pub fn with_capacity(cpus: u32, memory_mib: u64) -> Arc<Self> {
        Arc::new(Self {
            events: Arc::default(),
            containers: Mutex::default(),
            next_id: AtomicUsize::new(1),
            info: SystemInfo {
                total_cpus: cpus,
                total_memory_bytes: memory_mib * 1024 * 1024,
            },
            images: Mutex::default(),
            waits: Mutex::default(),
            failures: Mutex::default(),
        })
    }

    pub fn set_wait(&self, image: &str, mode: WaitMode) {
        self.waits.lock().unwrap().insert(image.to_string(), mode);
    }

    /// Make `op` fail for `image`, e.g. `fail("create", "redis")`.
    pub fn fail(&self, op: &str, image: &str) {
        self.failures.lock().unwrap().insert(format!("{op}:{image}"));
    }

    pub fn add_image(&self, image: &str) {
        self.images.lock().unwrap().insert(image.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {event:?} not recorded in {events:?}"))
    }

    /// Position of the first event starting with `prefix`.
    pub fn position_prefix(&self, prefix: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("no event starting with {prefix:?} in {events:?}"))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Creation inputs of every container created from `image`.
    pub fn inputs_for(&self, image: &str) -> Vec<ContainerCreateInput> {
        let containers = self.containers.lock().unwrap();
        let mut ids: Vec<_> = containers
            .iter()
            .filter(|(_, input)| input.image == image)
            .map(|(id, input)| (id.clone(), input.clone()))
            .collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids.into_iter().map(|(_, input)| input).collect()
    }

    pub fn id_of(&self, image: &str) -> String {
        let containers = self.containers.lock().unwrap();
        containers
            .iter()
            .find(|(_, input)| input.image == image)
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| panic!("no container created from {image}"))
    }

    /// Wait until `event` is recorded or panic after a second.
    pub async fn until(&self, event: &str) {
        for _ in 0..200 {
            if self.has(event) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {event:?}, got {:?}", self.events());
    }

    async fn until_all(&self, events: &[&str]) {
        while !events.iter().all(|e| self.has(e)) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn image_of(&self, id: &str) -> String {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .map(|input| input.image.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn check(&self, op: &'static str, subject: &str) -> Result<(), BackendError> {
        self.record(format!("{op}:{subject}"));
        if self.failures.lock().unwrap().contains(&format!("{op}:{subject}")) {
            return Err(BackendError::op(op, format!("injected failure for {subject}")));
        }
        Ok(())
    }
}

struct DropRecorder {
    events: Arc<Mutex<Vec<String>>>,
    label: String,
    armed: bool,
}

impl Drop for DropRecorder {
    fn drop(&mut self) {
        if self.armed {
            self.events
                .lock()
                .unwrap()
                .push(format!("wait-dropped:{}", self.label));
        }
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn system_info(&self) -> Result<SystemInfo, BackendError> {
        Ok(self.info)
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, BackendError> {
        Ok(self.images.lock().unwrap().contains(reference))
    }

    async fn image_pull(&self, reference: &str) -> Result<(), BackendError> {
        self.check("pull", reference)?;
        self.add_image(reference);
        Ok(())
    }

    async fn image_build(&self, input: &ImageBuildInput) -> Result<(), BackendError> {
        self.check("build", &input.tag)?;
        self.add_image(&input.tag);
        Ok(())
    }

    async fn volume_create(&self, name: &str) -> Result<(), BackendError> {
        self.check("volume-create", name)
    }

    async fn volume_delete(&self, name: &str) -> Result<(), BackendError> {
        self.check("volume-delete", name)
    }

    async fn container_create(
        &self,
        input: &ContainerCreateInput,
        _name: Option<&str>,
    ) -> Result<String, BackendError> {
        self.check("create", &input.image)?;
        let id = format!("c{:02}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), input.clone());
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> Result<(), BackendError> {
        let image = self.image_of(id);
        self.check("start", &image)
    }

    async fn container_wait(&self, id: &str) -> Result<WaitResult, BackendError> {
        let image = self.image_of(id);
        self.record(format!("wait:{image}"));
        let mode = self
            .waits
            .lock()
            .unwrap()
            .get(&image)
            .cloned()
            .unwrap_or(WaitMode::Exit(0));

        let mut guard = DropRecorder {
            events: self.events.clone(),
            label: image,
            armed: true,
        };
        let res = match mode {
            WaitMode::Exit(status_code) => Ok(WaitResult {
                status_code,
                error: None,
            }),
            WaitMode::Fail(reason) => Err(BackendError::op("wait", reason)),
            WaitMode::Block => std::future::pending().await,
            WaitMode::ExitAfter(events) => {
                self.until_all(events).await;
                Ok(WaitResult {
                    status_code: 0,
                    error: None,
                })
            }
            WaitMode::FailAfter(events, reason) => {
                self.until_all(events).await;
                Err(BackendError::op("wait", reason))
            }
        };
        guard.armed = false;
        res
    }

    async fn container_logs(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, BackendError> {
        let image = self.image_of(id);
        self.check("logs", &image)?;
        let (tx, rx) = mpsc::channel(8);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(format!("hello from {image}")).await;
            cancel.cancelled().await;
            events.lock().unwrap().push(format!("logs-stopped:{image}"));
        });
        Ok(rx)
    }

    async fn container_delete(&self, id: &str) -> Result<(), BackendError> {
        let image = self.image_of(id);
        self.check("delete", &image)
    }
}

/// Reporter that records diagnostics as `<kind>:<subject>`.
#[derive(Default)]
pub struct RecordingReporter {
    entries: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

impl Reporter for RecordingReporter {
    fn port_mapping_unsupported(&self, container: &str) {
        self.push(format!("port:{container}"));
    }

    fn cleanup_skipped(&self, resource: &str, id: &str) {
        self.push(format!("skipped:{resource}:{id}"));
    }

    fn cleanup_failed(&self, resource: &str, id: &str, _error: &str) {
        self.push(format!("cleanup-failed:{resource}:{id}"));
    }

    fn container_log(&self, container: &str, line: &str) {
        self.push(format!("log:{container}:{line}"));
    }
}

/// Run configuration wired to the given fakes.
pub fn run_config(backend: &Arc<FakeBackend>, reporter: &Arc<RecordingReporter>) -> RunConfig {
    let handle: BackendHandle = backend.clone();
    RunConfig::new("http://127.0.0.1:8080", "server-secret", "client-secret", 7)
        .with_backend(handle)
        .with_reporter(reporter.clone())
        .with_container_options(ContainerOptions::default())
        .with_agent("1.0.0", "/nonexistent")
}
