use tracing::{debug, info, warn};

use super::Reporter;

/// Reporter that emits diagnostics as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn port_mapping_unsupported(&self, container: &str) {
        warn!(
            container,
            "port mappings are unsupported, please tell the application running in the \
             additional container '{container}' to use a different port"
        );
    }

    fn cleanup_skipped(&self, resource: &str, id: &str) {
        info!(resource, id, "not cleaning up {resource} {id}, don't forget to remove it");
    }

    fn cleanup_failed(&self, resource: &str, id: &str, error: &str) {
        warn!(resource, id, error, "error while removing {resource}");
    }

    fn container_log(&self, container: &str, line: &str) {
        debug!(container, "container: {line}");
    }
}
