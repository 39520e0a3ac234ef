use std::{collections::BTreeMap, path::Path};

use async_trait::async_trait;
use cell_core::{Instance, InstanceError, RunConfig, backend::ImageBuildInput};
use cell_observe::ProgressScope;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Registry every prebuilt image lives in; descriptors carry no domain.
pub(crate) const PREBUILT_REGISTRY: &str = "gcr.io";

/// Makes sure a prebuilt image exists, building it from the project if not.
#[derive(Debug, Clone)]
pub struct PrebuiltInstance {
    pub image: String,
    pub dockerfile: String,
    pub arguments: BTreeMap<String, String>,
}

impl PrebuiltInstance {
    pub(crate) fn image_name(repository: &str, reference: &str) -> String {
        format!(
            "{PREBUILT_REGISTRY}/{}:{reference}",
            repository.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Instance for PrebuiltInstance {
    fn name(&self) -> &'static str {
        "prebuilt"
    }

    #[instrument(name = "prebuilt_instance", skip_all, fields(image = %self.image))]
    async fn run(&self, cancel: CancellationToken, config: &RunConfig) -> Result<(), InstanceError> {
        let backend = config.container_backend()?;
        if backend.image_exists(&self.image).await? {
            debug!("image already exists, nothing to build");
            return Ok(());
        }

        let input = ImageBuildInput {
            tag: self.image.clone(),
            context_dir: config.project_dir().to_path_buf(),
            dockerfile: self.dockerfile.clone(),
            build_args: self.arguments.clone(),
        };

        let scope = ProgressScope::start("image build");
        scope.info(format_args!("building image {}...", self.image));
        let res = tokio::select! {
            res = backend.image_build(&input) => res,
            _ = cancel.cancelled() => {
                scope.finish(false);
                return Err(InstanceError::Canceled);
            }
        };
        match res {
            Ok(()) => {
                scope.finish(true);
                Ok(())
            }
            Err(e) => {
                scope.error(format_args!("failed to build {}: {e}", self.image));
                scope.finish(false);
                Err(e.into())
            }
        }
    }

    fn working_directory(&self, project_dir: &Path, _dirty_mode: bool) -> String {
        project_dir.to_string_lossy().into_owned()
    }
}
