//! Container lifecycle status and state machine.
//!
//! Defines the possible states of a container and valid transitions between them.

use chrono::{DateTime, Utc};
use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde::{Deserialize, Serialize};

use crate::engine::RuntimeMode;

/// Lifecycle status of a container.
///
/// ```text
/// spawn()            → Creating
/// runtime built      → Ready   (or Errored, then removed)
/// operation admitted → Busy ⇄ Ready
/// fatal engine error → Errored (still addressable)
/// terminate()/reaper → Terminating → Terminated (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Runtime construction in progress.
    Creating,

    /// Idle and accepting operations.
    Ready,

    /// An operation is running, or more are queued.
    Busy,

    /// The runtime failed unrecoverably. Operations are still admitted and
    /// surface the runtime's own error.
    Errored,

    /// Teardown started; new operations are rejected.
    Terminating,

    /// Teardown finished. The record leaves the registry right after.
    Terminated,
}

impl ContainerStatus {
    /// Terminating or terminated: no new operations are admitted.
    pub fn is_finalizing(&self) -> bool {
        matches!(self, ContainerStatus::Terminating | ContainerStatus::Terminated)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerStatus::Terminated)
    }

    /// Whether the gate may admit a new operation.
    pub fn accepts_operations(&self) -> bool {
        !self.is_finalizing()
    }

    /// Whether the gate drives this status to busy/ready around operations.
    pub fn follows_gate(&self) -> bool {
        matches!(self, ContainerStatus::Ready | ContainerStatus::Busy)
    }

    /// Check if transition to target status is valid.
    pub fn can_transition_to(&self, target: ContainerStatus) -> bool {
        use ContainerStatus::*;
        matches!(
            (self, target),
            (Creating, Ready)
                | (Creating, Errored)
                | (Creating, Terminating)
                | (Ready, Busy)
                | (Ready, Errored)
                | (Ready, Terminating)
                | (Busy, Ready)
                | (Busy, Errored)
                | (Busy, Terminating)
                | (Errored, Terminating)
                | (Terminating, Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::Ready => "ready",
            ContainerStatus::Busy => "busy",
            ContainerStatus::Errored => "errored",
            ContainerStatus::Terminating => "terminating",
            ContainerStatus::Terminated => "terminated",
        }
    }
}

impl std::str::FromStr for ContainerStatus {
    type Err = SandpitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ContainerStatus::Creating),
            "ready" => Ok(ContainerStatus::Ready),
            "busy" => Ok(ContainerStatus::Busy),
            "errored" => Ok(ContainerStatus::Errored),
            "terminating" => Ok(ContainerStatus::Terminating),
            "terminated" => Ok(ContainerStatus::Terminated),
            other => Err(SandpitError::InvalidArgument(format!(
                "unknown container status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dynamic container state (changes during the lifecycle).
///
/// Guarded by the record's lock; every mutation passes the caller's clock
/// reading so tests can drive time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: ContainerStatus,
    /// Execution strategy chosen at construction.
    pub runtime_mode: Option<RuntimeMode>,
    /// Last status change.
    pub last_updated: DateTime<Utc>,
    /// Last time an operation settled (or the container was created).
    pub last_used_at: DateTime<Utc>,
    /// Always 0 or 1.
    pub active_operations: u32,
    /// Admitted and not yet finished, the active one included.
    pub pending_operations: u32,
    pub last_error: Option<String>,
}

impl ContainerState {
    /// Initial state of a freshly spawned container.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: ContainerStatus::Creating,
            runtime_mode: None,
            last_updated: now,
            last_used_at: now,
            active_operations: 0,
            pending_operations: 0,
            last_error: None,
        }
    }

    /// Attempt a validated transition. Returns the previous status.
    pub fn transition_to(
        &mut self,
        new_status: ContainerStatus,
        now: DateTime<Utc>,
    ) -> SandpitResult<ContainerStatus> {
        if !self.status.can_transition_to(new_status) {
            return Err(SandpitError::InvalidState(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            )));
        }

        let previous = self.status;
        self.status = new_status;
        self.last_updated = now;
        Ok(previous)
    }

    /// Force set status without validation (internal recovery paths).
    pub fn force_status(&mut self, status: ContainerStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_updated = now;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Idle per the reaper's definition: ready with nothing admitted.
    pub fn is_idle(&self) -> bool {
        self.status == ContainerStatus::Ready
            && self.active_operations == 0
            && self.pending_operations == 0
    }
}
