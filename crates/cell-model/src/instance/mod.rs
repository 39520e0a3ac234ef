//! Backend-selection payloads carried by a task.
//!
//! A task names its execution backend with a tagged JSON object:
//!
//! ```json
//! { "type": "container", "image": "rust:latest", "cpu": 2.0, "memory": 4096 }
//! ```
//!
//! [`InstancePayload`] keeps the tag and the raw fields; [`InstanceDescriptor::decode`]
//! turns it into one of the known, strongly typed descriptors.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};

mod container;
pub use container::{AdditionalContainer, ContainerInstance, PortMapping};

mod image;
pub use image::{PipeInstance, PrebuiltImageInstance};

mod worker;
pub use worker::{
    ContainerIsolation, DockerBuilderInstance, Isolation, ParallelsIsolation,
    PersistentWorkerInstance,
};

/// Undecoded backend-selection payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstancePayload {
    /// Instance type tag (`container`, `pipe`, `prebuiltImage`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining fields, decoded lazily according to `kind`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InstancePayload {
    /// Build a payload from a tag and a JSON object body.
    ///
    /// Non-object bodies are treated as empty.
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        let fields = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            fields,
        }
    }
}

/// Closed set of instance descriptors understood by this runner.
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceDescriptor {
    Container(ContainerInstance),
    Pipe(PipeInstance),
    PrebuiltImage(PrebuiltImageInstance),
    PersistentWorker(PersistentWorkerInstance),
    DockerBuilder(DockerBuilderInstance),
}

impl InstanceDescriptor {
    pub const KIND_CONTAINER: &'static str = "container";
    pub const KIND_PIPE: &'static str = "pipe";
    pub const KIND_PREBUILT_IMAGE: &'static str = "prebuiltImage";
    pub const KIND_PERSISTENT_WORKER: &'static str = "persistentWorker";
    pub const KIND_DOCKER_BUILDER: &'static str = "dockerBuilder";

    /// Decode a payload into a typed descriptor.
    ///
    /// Errors:
    /// - [`ModelError::UnknownInstanceKind`] when the tag is not a known kind;
    /// - [`ModelError::InvalidInstance`] when the tag is known but the fields don't decode.
    pub fn decode(payload: &InstancePayload) -> ModelResult<Self> {
        let kind = match payload.kind.as_str() {
            Self::KIND_CONTAINER => Self::KIND_CONTAINER,
            Self::KIND_PIPE => Self::KIND_PIPE,
            Self::KIND_PREBUILT_IMAGE => Self::KIND_PREBUILT_IMAGE,
            Self::KIND_PERSISTENT_WORKER => Self::KIND_PERSISTENT_WORKER,
            Self::KIND_DOCKER_BUILDER => Self::KIND_DOCKER_BUILDER,
            other => return Err(ModelError::UnknownInstanceKind(other.to_string())),
        };
        let body = Value::Object(payload.fields.clone());
        let invalid = |e: serde_json::Error| ModelError::InvalidInstance {
            kind,
            reason: e.to_string(),
        };

        let descriptor = match kind {
            Self::KIND_CONTAINER => Self::Container(serde_json::from_value(body).map_err(invalid)?),
            Self::KIND_PIPE => Self::Pipe(serde_json::from_value(body).map_err(invalid)?),
            Self::KIND_PREBUILT_IMAGE => {
                Self::PrebuiltImage(serde_json::from_value(body).map_err(invalid)?)
            }
            Self::KIND_PERSISTENT_WORKER => {
                Self::PersistentWorker(serde_json::from_value(body).map_err(invalid)?)
            }
            _ => Self::DockerBuilder(serde_json::from_value(body).map_err(invalid)?),
        };
        Ok(descriptor)
    }

    /// Returns the kind tag as a static string.
    pub fn kind(&self) -> &'static str {
        match self {
            InstanceDescriptor::Container(_) => Self::KIND_CONTAINER,
            InstanceDescriptor::Pipe(_) => Self::KIND_PIPE,
            InstanceDescriptor::PrebuiltImage(_) => Self::KIND_PREBUILT_IMAGE,
            InstanceDescriptor::PersistentWorker(_) => Self::KIND_PERSISTENT_WORKER,
            InstanceDescriptor::DockerBuilder(_) => Self::KIND_DOCKER_BUILDER,
        }
    }
}
