use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::ContainerBackend;

/// When to pull an image before creating a container from it.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PullPolicy {
    /// Always pull, refreshing mutable tags.
    Always,
    /// Pull only if the backend doesn't have the image yet.
    #[default]
    IfMissing,
    /// Never pull; the image must already exist.
    Never,
}

/// Same spelling as the serialized form.
impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PullPolicy::Always => "always",
            PullPolicy::IfMissing => "ifMissing",
            PullPolicy::Never => "never",
        })
    }
}

/// Container-specific knobs shared by every container the runner creates.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerOptions {
    pub pull_policy: PullPolicy,
    /// Leave containers and volumes behind for inspection.
    pub no_cleanup: bool,
}

impl ContainerOptions {
    /// Decide whether `reference` has to be pulled before use.
    ///
    /// With [`PullPolicy::IfMissing`] an inspection failure counts as "missing",
    /// so the pull itself surfaces the real problem.
    pub async fn should_pull_image(&self, backend: &dyn ContainerBackend, reference: &str) -> bool {
        match self.pull_policy {
            PullPolicy::Always => true,
            PullPolicy::Never => false,
            PullPolicy::IfMissing => match backend.image_exists(reference).await {
                Ok(exists) => !exists,
                Err(e) => {
                    debug!(image = reference, error = %e, "image inspection failed, will pull");
                    true
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_text_matches_serialized_name() {
        for policy in [PullPolicy::Always, PullPolicy::IfMissing, PullPolicy::Never] {
            let json = serde_json::to_string(&policy).unwrap();
            assert_eq!(json, format!("\"{policy}\""));
            assert_eq!(serde_json::from_str::<PullPolicy>(&json).unwrap(), policy);
        }
    }

    #[test]
    fn options_default_from_empty_json() {
        let opts: ContainerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.pull_policy, PullPolicy::IfMissing);
        assert!(!opts.no_cleanup);
    }
}
