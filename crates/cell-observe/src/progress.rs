//! Named progress scopes for long-running steps (image pulls, builds).
use std::{fmt::Display, time::Instant};

use tracing::{Span, debug, error, info, info_span, warn};

/// A named step whose outcome is logged exactly once.
///
/// Messages logged through the scope are attached to its span. Consuming the
/// scope with [`ProgressScope::finish`] logs the outcome; dropping it
/// unfinished logs that the step was abandoned.
#[derive(Debug)]
pub struct ProgressScope {
    name: &'static str,
    span: Span,
    started: Instant,
    finished: bool,
}

impl ProgressScope {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            span: info_span!("progress", scope = name),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn info(&self, msg: impl Display) {
        let _g = self.span.enter();
        info!("{msg}");
    }

    pub fn error(&self, msg: impl Display) {
        let _g = self.span.enter();
        error!("{msg}");
    }

    /// Close the scope, logging whether the step succeeded.
    pub fn finish(mut self, success: bool) {
        self.finished = true;
        let _g = self.span.enter();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if success {
            info!(elapsed_ms, "{} finished", self.name);
        } else {
            warn!(elapsed_ms, "{} failed", self.name);
        }
    }
}

impl Drop for ProgressScope {
    fn drop(&mut self) {
        if !self.finished {
            let _g = self.span.enter();
            debug!("{} abandoned", self.name);
        }
    }
}
