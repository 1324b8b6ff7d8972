//! Thread-safe container registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use sandpit_shared::errors::{SandpitError, SandpitResult};

use crate::container::{ContainerStatus, SharedContainerImpl};
use crate::metrics::LiveGauges;
use crate::runtime::types::ContainerID;

/// Registry of live containers, keyed by identifier.
///
/// Reads (`get`, `list`, gauges) share the lock; `register` and `remove`
/// take it exclusively. The capacity check and the insert happen under the
/// same write lock, so concurrent spawns can never overshoot the ceiling.
#[derive(Default)]
pub(crate) struct ContainerManager {
    containers: RwLock<HashMap<ContainerID, SharedContainerImpl>>,
    /// Set under the write lock by `close`; checked by `register`.
    closed: AtomicBool,
}

impl ContainerManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - `Disposed` once the registry has been closed
    /// - `Capacity` when `limit` records are already registered
    /// - `AlreadyExists` when the identifier is taken
    pub(crate) fn register(
        &self,
        container: SharedContainerImpl,
        limit: usize,
    ) -> SandpitResult<()> {
        let mut containers = self.containers.write();

        if self.closed.load(Ordering::Relaxed) {
            return Err(SandpitError::Disposed);
        }
        if containers.len() >= limit {
            return Err(SandpitError::Capacity { limit });
        }
        let id = container.id().clone();
        if containers.contains_key(&id) {
            return Err(SandpitError::AlreadyExists(id.to_string()));
        }

        tracing::debug!(container_id = %id, live = containers.len() + 1, "Registering container");
        containers.insert(id, container);
        Ok(())
    }

    /// Refuse every later `register`. Records already present stay, so a
    /// `list` taken after this call sees every container that will ever live.
    pub(crate) fn close(&self) {
        let _containers = self.containers.write();
        self.closed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.containers.read().contains_key(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<SharedContainerImpl> {
        self.containers.read().get(id).cloned()
    }

    /// Remove `container` if it is still the registered record for its id.
    ///
    /// Returns false when the slot is empty or held by a different record.
    pub(crate) fn remove(&self, container: &SharedContainerImpl) -> bool {
        let mut containers = self.containers.write();
        match containers.get(container.id()) {
            Some(current) if Arc::ptr_eq(current, container) => {
                containers.remove(container.id());
                tracing::debug!(container_id = %container.id(), "Unregistered container");
                true
            }
            _ => false,
        }
    }

    /// All records in creation order.
    pub(crate) fn list(&self) -> Vec<SharedContainerImpl> {
        let mut containers: Vec<_> = self.containers.read().values().cloned().collect();
        containers.sort_by_key(|c| c.config.sequence);
        containers
    }

    pub(crate) fn count(&self) -> usize {
        self.containers.read().len()
    }

    /// Sample the live gauges.
    pub(crate) fn gauges(&self) -> LiveGauges {
        let containers = self.containers.read();
        let mut gauges = LiveGauges {
            live_containers: containers.len() as u64,
            ..LiveGauges::default()
        };
        for container in containers.values() {
            let state = container.state.lock();
            if state.status == ContainerStatus::Busy {
                gauges.busy_containers += 1;
            }
            gauges.active_operations += u64::from(state.active_operations);
            gauges.pending_operations += u64::from(state.pending_operations);
        }
        gauges
    }
}
