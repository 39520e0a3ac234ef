use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Command property holding the container image a pipe stage runs in.
pub const PROPERTY_IMAGE: &str = "image";

/// Single command of a task, as produced by the configuration parser.
///
/// Only the parts the execution layer needs are modelled: the command's
/// name (used for `-command-from`/`-command-to` windows) and its free-form
/// properties.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Unique command name within the task.
    pub name: String,
    /// Free-form properties attached by the parser.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Command {
    /// Create a command without properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Attach the `image` property.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.properties.insert(PROPERTY_IMAGE.to_string(), image.into());
        self
    }

    /// Image this command must run in, if it starts a new pipe stage.
    pub fn image(&self) -> Option<&str> {
        self.properties
            .get(PROPERTY_IMAGE)
            .map(String::as_str)
            .filter(|image| !image.is_empty())
    }
}
