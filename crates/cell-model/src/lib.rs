mod domain;
pub use domain::{Env, MebiBytes, PlatformKind, TaskId};

mod error;
pub use error::{ModelError, ModelResult};

mod command;
pub use command::{Command, PROPERTY_IMAGE};

mod instance;
pub use instance::{
    AdditionalContainer, ContainerInstance, ContainerIsolation, DockerBuilderInstance,
    InstanceDescriptor, InstancePayload, Isolation, ParallelsIsolation, PersistentWorkerInstance,
    PipeInstance, PortMapping, PrebuiltImageInstance,
};

mod strategy;
pub use strategy::RetryStrategy;
