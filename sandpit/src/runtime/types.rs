//! Core data types for container lifecycle management.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::container::{ContainerState, ContainerStatus};
use crate::container::ContainerConfig;
use crate::engine::RuntimeMode;
use crate::metrics::{ContainerMetrics, ContainerMetricsStorage};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Unique identifier for a container.
///
/// Caller-supplied or produced by the runtime's [`IdGenerator`]. Unique among
/// live containers; an identifier may be reused once its container is gone.
///
/// # Example
///
/// ```
/// use sandpit::ContainerID;
///
/// let id = ContainerID::new("container-1");
/// assert_eq!(id.as_str(), "container-1");
/// assert_eq!(id.short(), "containe");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerID(String);

impl ContainerID {
    /// Length of the short form used in log lines and Debug output.
    pub const SHORT_LENGTH: usize = 8;

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters (or the whole id when shorter).
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(Self::SHORT_LENGTH) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerID({})", self.0)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContainerID {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ContainerID {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source of identifiers for containers spawned without one.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn generate(&self) -> ContainerID;
}

/// Monotonic `{prefix}-{n}` identifiers, starting at 1.
#[derive(Debug)]
pub struct CounterIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl CounterIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for CounterIdGenerator {
    fn default() -> Self {
        Self::new(sandpit_shared::constants::defaults::ID_PREFIX)
    }
}

impl IdGenerator for CounterIdGenerator {
    fn generate(&self) -> ContainerID {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        ContainerID(format!("{}-{}", self.prefix, n))
    }
}

/// ULID identifiers: 26 characters, lexicographically sortable by time.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidIdGenerator;

impl IdGenerator for UlidIdGenerator {
    fn generate(&self) -> ContainerID {
        ContainerID(ulid::Ulid::new().to_string())
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Kind of work admitted through a container's operation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Execute,
    RunFile,
    Install,
    Terminate,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Execute => "execute",
            OperationKind::RunFile => "run-file",
            OperationKind::Install => "install",
            OperationKind::Terminate => "terminate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an admitted operation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl OperationOutcome {
    pub fn of<T>(result: &sandpit_shared::SandpitResult<T>) -> Self {
        match result {
            Ok(_) => OperationOutcome::Succeeded,
            Err(e) if e.is_timeout() => OperationOutcome::TimedOut,
            Err(e) if e.is_aborted() => OperationOutcome::Aborted,
            Err(_) => OperationOutcome::Failed,
        }
    }
}

/// Why a container was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// `terminate()` or `terminate_all()`.
    Explicit,
    /// Removed by the idle reaper.
    IdleEviction,
    /// Runtime disposal.
    Disposed,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Explicit => "explicit",
            TerminationReason::IdleEviction => "idle-eviction",
            TerminationReason::Disposed => "disposed",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CONTAINER INFO
// ============================================================================

/// Public descriptor of a container (returned by spawn, get and list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerID,

    pub status: ContainerStatus,

    /// Execution strategy in use; None until the runtime is constructed.
    pub runtime_mode: Option<RuntimeMode>,

    pub working_dir: String,

    /// Source container when created through `clone`.
    pub parent: Option<ContainerID>,

    pub created_at: DateTime<Utc>,

    /// Last status change.
    pub last_updated: DateTime<Utc>,

    /// Last time an operation settled on this container.
    pub last_used_at: DateTime<Utc>,

    pub active_operations: u32,

    /// Admitted but not yet finished, the active one included.
    pub pending_operations: u32,

    pub metadata: HashMap<String, serde_json::Value>,

    pub last_error: Option<String>,

    pub metrics: ContainerMetrics,
}

impl ContainerInfo {
    pub(crate) fn new(
        config: &ContainerConfig,
        state: &ContainerState,
        metrics: &ContainerMetricsStorage,
    ) -> Self {
        Self {
            id: config.id.clone(),
            status: state.status,
            runtime_mode: state.runtime_mode,
            working_dir: config.working_dir.clone(),
            parent: config.parent.clone(),
            created_at: config.created_at,
            last_updated: state.last_updated,
            last_used_at: state.last_used_at,
            active_operations: state.active_operations,
            pending_operations: state.pending_operations,
            metadata: config.metadata.clone(),
            last_error: state.last_error.clone(),
            metrics: ContainerMetrics::from_storage(metrics),
        }
    }

    /// Time since the container was last used, as seen at `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_used_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_short() {
        assert_eq!(ContainerID::new("abc").short(), "abc");
        assert_eq!(ContainerID::new("0123456789").short(), "01234567");
    }

    #[test]
    fn test_container_id_display_and_debug() {
        let id = ContainerID::new("container-7");
        assert_eq!(format!("{}", id), "container-7");
        assert_eq!(format!("{:?}", id), "ContainerID(container-7)");
    }

    #[test]
    fn test_container_id_serializes_as_string() {
        let id = ContainerID::new("c-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
    }

    #[test]
    fn test_counter_generator_is_monotonic() {
        let generator = CounterIdGenerator::new("box");
        assert_eq!(generator.generate().as_str(), "box-1");
        assert_eq!(generator.generate().as_str(), "box-2");
        assert_eq!(
            CounterIdGenerator::default().generate().as_str(),
            "container-1"
        );
    }

    #[test]
    fn test_ulid_generator() {
        let generator = UlidIdGenerator;
        let a = generator.generate();
        let b = generator.generate();
        assert_eq!(a.as_str().len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn test_outcome_of_result() {
        use sandpit_shared::SandpitError;

        assert_eq!(
            OperationOutcome::of(&Ok::<_, SandpitError>(1)),
            OperationOutcome::Succeeded
        );
        assert_eq!(
            OperationOutcome::of::<()>(&Err(SandpitError::Aborted {
                id: "c".into(),
                operation: "execute".into()
            })),
            OperationOutcome::Aborted
        );
        assert_eq!(
            OperationOutcome::of::<()>(&Err(SandpitError::Execution("x".into()))),
            OperationOutcome::Failed
        );
    }
}
