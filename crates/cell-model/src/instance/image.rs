use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::MebiBytes;

/// Multi-stage task: each stage runs a slice of the command list in its own container.
///
/// The stage split is derived from the command list, not from the descriptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipeInstance {
    pub cpu: f32,
    pub memory: MebiBytes,
}

/// Task whose only job is to make sure a prebuilt image exists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrebuiltImageInstance {
    /// Repository path without the registry domain.
    pub repository: String,
    /// Tag or digest.
    pub reference: String,
    /// Dockerfile path inside the build context.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dockerfile: String,
    /// Build arguments.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
}
