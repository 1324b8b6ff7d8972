//! Error taxonomy for the orchestrator.
//!
//! Every public operation either resolves with a typed value or fails with
//! exactly one [`SandpitError`]. The error is `Clone` because a single
//! teardown result is handed to every caller that awaited it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across all sandpit crates.
pub type SandpitResult<T> = Result<T, SandpitError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandpitError {
    /// Spawn rejected because the live-container ceiling is reached.
    #[error("capacity reached: {limit} containers are already live")]
    Capacity { limit: usize },

    /// Spawn rejected because the identifier is already registered.
    #[error("container {0} already exists")]
    AlreadyExists(String),

    /// The runtime failed to initialize during spawn.
    #[error("failed to construct runtime for container {id}: {message}")]
    Construction { id: String, message: String },

    #[error("container {0} not found")]
    NotFound(String),

    /// The container is terminating or terminated.
    #[error("container {id} is {status}")]
    Finalizing { id: String, status: String },

    #[error("{operation} on container {id} timed out after {timeout:?}")]
    Timeout {
        id: String,
        operation: String,
        timeout: Duration,
    },

    #[error("{operation} on container {id} was aborted")]
    Aborted { id: String, operation: String },

    /// User code failed inside the runtime.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The runtime itself failed (crashed worker, broken handle).
    #[error("engine error: {0}")]
    Engine(String),

    #[error("install failed: {0}")]
    Install(String),

    /// Filesystem read/write or snapshot failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("config error: {0}")]
    Config(String),

    /// The orchestrator has been disposed.
    #[error("orchestrator has been disposed")]
    Disposed,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`SandpitError`], cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Capacity,
    AlreadyExists,
    Construction,
    NotFound,
    Finalizing,
    Timeout,
    Aborted,
    Execution,
    Engine,
    Install,
    Storage,
    InvalidArgument,
    InvalidState,
    Config,
    Disposed,
    Internal,
}

impl SandpitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandpitError::Capacity { .. } => ErrorKind::Capacity,
            SandpitError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SandpitError::Construction { .. } => ErrorKind::Construction,
            SandpitError::NotFound(_) => ErrorKind::NotFound,
            SandpitError::Finalizing { .. } => ErrorKind::Finalizing,
            SandpitError::Timeout { .. } => ErrorKind::Timeout,
            SandpitError::Aborted { .. } => ErrorKind::Aborted,
            SandpitError::Execution(_) => ErrorKind::Execution,
            SandpitError::Engine(_) => ErrorKind::Engine,
            SandpitError::Install(_) => ErrorKind::Install,
            SandpitError::Storage(_) => ErrorKind::Storage,
            SandpitError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SandpitError::InvalidState(_) => ErrorKind::InvalidState,
            SandpitError::Config(_) => ErrorKind::Config,
            SandpitError::Disposed => ErrorKind::Disposed,
            SandpitError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SandpitError::Timeout { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, SandpitError::Aborted { .. })
    }

    /// True for failures that leave the runtime handle unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SandpitError::Engine(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SandpitError::Capacity { limit: 1 }.kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            SandpitError::NotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(SandpitError::Disposed.kind(), ErrorKind::Disposed);
    }

    #[test]
    fn test_timeout_message_carries_duration() {
        let err = SandpitError::Timeout {
            id: "c-1".into(),
            operation: "execute".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert!(!err.is_aborted());
        assert!(err.to_string().contains("250ms"));
        assert!(err.to_string().contains("c-1"));
    }

    #[test]
    fn test_only_engine_errors_are_fatal() {
        assert!(SandpitError::Engine("worker exited".into()).is_fatal());
        assert!(!SandpitError::Execution("boom".into()).is_fatal());
        assert!(
            !SandpitError::Aborted {
                id: "x".into(),
                operation: "execute".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::AlreadyExists).unwrap();
        assert_eq!(json, "\"already-exists\"");
    }
}
