use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use super::{LoggerFormat, LoggerLevel};

/// Logging setup of the agent runner, as read from the task file's `logger` section.
///
/// Timestamps are always UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` expression, e.g. `"info"` or `"cell_exec=debug,info"`.
    pub level: LoggerLevel,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::default(),
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    /// Color only when asked for and stdout is a terminal.
    pub fn should_use_color(&self) -> bool {
        self.use_color && std::io::stdout().is_terminal()
    }
}
