mod env;
pub use env::Env;

mod platform;
pub use platform::PlatformKind;

/// Numeric task identifier assigned by the CI server.
///
/// Passed to the agent on its command line and never logged.
pub type TaskId = i64;

/// Memory quota expressed in MiB, as it appears in task descriptors.
pub type MebiBytes = u32;
