//! Side channel for best-effort diagnostics.
//!
//! Warnings that must never change a task's outcome (unsupported port
//! mappings, cleanup hiccups, container output) go through a [`Reporter`]
//! instead of the returned error.
mod sink;
pub use sink::TracingReporter;

use std::sync::Arc;

/// Sink for diagnostics emitted while a task runs.
///
/// Implementations are injected via [`crate::RunConfig`] and shared by every
/// concurrent part of an orchestration.
pub trait Reporter: Send + Sync + 'static {
    /// A sidecar declared host ports, which are not bound.
    ///
    /// Emitted at most once per set of additional containers.
    fn port_mapping_unsupported(&self, container: &str);

    /// `resource` identified by `id` is intentionally left behind.
    fn cleanup_skipped(&self, resource: &str, id: &str);

    /// Removing `resource` identified by `id` failed.
    fn cleanup_failed(&self, resource: &str, id: &str, error: &str);

    /// One line of output from a container.
    fn container_log(&self, container: &str, line: &str);
}

/// Shared handle to a reporter.
pub type ReporterHandle = Arc<dyn Reporter>;

/// Create the default reporter, which forwards everything to `tracing`.
#[inline]
pub fn tracing_reporter() -> ReporterHandle {
    Arc::new(TracingReporter)
}
