pub mod agent;
pub mod backend;
pub mod clamp;
pub mod error;
pub mod instance;
pub mod options;
pub mod platform;
pub mod report;
pub mod retry;

pub use error::InstanceError;
pub use instance::{Instance, RunConfig};
pub use options::{ContainerOptions, PullPolicy};
pub use platform::Platform;
pub use report::{Reporter, ReporterHandle, TracingReporter};

