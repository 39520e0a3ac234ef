use thiserror::Error;

use crate::backend::BackendError;

/// Failure of an instance: dispatch, provisioning, connectivity or execution.
///
/// Each variant is a stable category; the payload is a human-readable phase
/// description meant for the task log, not for matching.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("failed to create instance: {0}")]
    FailedToCreate(String),

    #[error("unsupported instance type: {0}")]
    Unsupported(String),

    #[error("additional container failed: {0}")]
    AdditionalContainerFailed(String),

    #[error("{isolation} isolation failed: {reason}")]
    IsolationFailed {
        isolation: &'static str,
        reason: String,
    },

    #[error("container backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("task was canceled")]
    Canceled,
}

impl InstanceError {
    /// Shorthand for [`InstanceError::IsolationFailed`].
    pub fn isolation(isolation: &'static str, reason: impl Into<String>) -> Self {
        InstanceError::IsolationFailed {
            isolation,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`InstanceError::AdditionalContainerFailed`].
    pub fn additional(reason: impl std::fmt::Display) -> Self {
        InstanceError::AdditionalContainerFailed(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_message_names_the_isolation() {
        let err = InstanceError::isolation("Parallels", "failed to retrieve VM \"x\" IP-address");
        assert_eq!(
            err.to_string(),
            "Parallels isolation failed: failed to retrieve VM \"x\" IP-address"
        );
    }

    #[test]
    fn backend_errors_convert() {
        let err: InstanceError = BackendError::Unavailable("no daemon".into()).into();
        assert!(matches!(err, InstanceError::Backend(_)));
    }
}
