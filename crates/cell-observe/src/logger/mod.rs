mod config;
mod error;
mod format;
mod install;
mod level;
mod timer;

pub use config::LoggerConfig;
pub use error::{LoggerError, LoggerResult};
pub use format::LoggerFormat;
pub use level::LoggerLevel;
pub use timer::UtcRfc3339;

/// Install the global `tracing` subscriber described by `cfg`.
///
/// Must be called once, before the first task runs; a second call fails
/// with [`LoggerError::AlreadyInitialized`].
///
/// ```rust
/// use cell_observe::{LoggerConfig, init_logger};
///
/// init_logger(&LoggerConfig::default()).expect("logger");
/// tracing::info!("ready");
/// ```
pub fn init_logger(cfg: &LoggerConfig) -> LoggerResult<()> {
    match cfg.format {
        LoggerFormat::Text => install::text(cfg),
        LoggerFormat::Json => install::json(cfg),
        LoggerFormat::Journald => install::journald(cfg),
    }
}
