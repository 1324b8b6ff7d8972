//! Lifecycle and operation events.
//!
//! Events are published on a `tokio::sync::broadcast` channel at the moment
//! the transition they describe happens. Subscribers that fall behind see
//! `RecvError::Lagged`; publishing never blocks and never fails when nobody
//! is listening.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::container::ContainerStatus;
use crate::engine::RuntimeMode;
use crate::runtime::types::{ContainerID, OperationKind, OperationOutcome, TerminationReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ContainerEvent {
    /// Spawn accepted; the record is registered in `creating`.
    ContainerCreated { id: ContainerID },

    ContainerReady { id: ContainerID, mode: RuntimeMode },

    /// Construction failure, fatal engine error, or teardown failure.
    ContainerError { id: ContainerID, error: String },

    ContainerStatus {
        id: ContainerID,
        from: ContainerStatus,
        to: ContainerStatus,
    },

    OperationStart { id: ContainerID, kind: OperationKind },

    OperationEnd {
        id: ContainerID,
        kind: OperationKind,
        #[serde(with = "duration_ms")]
        duration: Duration,
        outcome: OperationOutcome,
    },

    /// The record reached `terminated` and left the registry.
    ContainerTerminated {
        id: ContainerID,
        reason: TerminationReason,
    },

    /// The idle reaper picked this container; termination follows.
    ContainerEvicted {
        id: ContainerID,
        #[serde(with = "duration_ms")]
        idle_for: Duration,
    },
}

impl ContainerEvent {
    /// Channel name of this event, e.g. `operation-end`.
    pub fn name(&self) -> &'static str {
        match self {
            ContainerEvent::ContainerCreated { .. } => "container-created",
            ContainerEvent::ContainerReady { .. } => "container-ready",
            ContainerEvent::ContainerError { .. } => "container-error",
            ContainerEvent::ContainerStatus { .. } => "container-status",
            ContainerEvent::OperationStart { .. } => "operation-start",
            ContainerEvent::OperationEnd { .. } => "operation-end",
            ContainerEvent::ContainerTerminated { .. } => "container-terminated",
            ContainerEvent::ContainerEvicted { .. } => "container-evicted",
        }
    }

    pub fn container_id(&self) -> &ContainerID {
        match self {
            ContainerEvent::ContainerCreated { id }
            | ContainerEvent::ContainerReady { id, .. }
            | ContainerEvent::ContainerError { id, .. }
            | ContainerEvent::ContainerStatus { id, .. }
            | ContainerEvent::OperationStart { id, .. }
            | ContainerEvent::OperationEnd { id, .. }
            | ContainerEvent::ContainerTerminated { id, .. }
            | ContainerEvent::ContainerEvicted { id, .. } => id,
        }
    }
}

/// Broadcast publisher owned by the runtime.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ContainerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: ContainerEvent) {
        tracing::trace!(
            container_id = %event.container_id(),
            event = event.name(),
            "Emitting event"
        );
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
