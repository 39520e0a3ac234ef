use cell_core::{ContainerOptions, InstanceError, backend::ContainerBackend};
use cell_observe::ProgressScope;

/// Pull `reference` if the pull policy asks for it.
///
/// Pull failures are reported as [`InstanceError::AdditionalContainerFailed`]
/// for the main image as well as for sidecar images.
pub async fn pull_if_needed(
    backend: &dyn ContainerBackend,
    options: &ContainerOptions,
    reference: &str,
) -> Result<(), InstanceError> {
    if !options.should_pull_image(backend, reference).await {
        return Ok(());
    }

    let scope = ProgressScope::start("image pull");
    scope.info(format_args!(
        "pulling image {reference} (pull policy {})...",
        options.pull_policy
    ));

    match backend.image_pull(reference).await {
        Ok(()) => {
            scope.finish(true);
            Ok(())
        }
        Err(e) => {
            scope.error(format_args!("failed to pull {reference}: {e}"));
            scope.finish(false);
            Err(InstanceError::additional(e))
        }
    }
}
