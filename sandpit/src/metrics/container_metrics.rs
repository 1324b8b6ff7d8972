//! Per-container metrics.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Storage for per-container metrics.
///
/// One instance per container record. Counters are monotonic.
#[derive(Default, Debug)]
pub struct ContainerMetricsStorage {
    pub(crate) operations_executed: AtomicU64,
    pub(crate) operation_errors: AtomicU64,
    pub(crate) operation_timeouts: AtomicU64,
    pub(crate) operation_aborts: AtomicU64,
    /// Time from spawn() call to ready, set once
    pub(crate) create_duration_ms: OnceLock<u64>,
}

impl ContainerMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_create_duration(&self, duration_ms: u64) {
        let _ = self.create_duration_ms.set(duration_ms);
    }

    pub(crate) fn increment_operations_executed(&self) {
        self.operations_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_operation_errors(&self) {
        self.operation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_operation_timeouts(&self) {
        self.operation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_operation_aborts(&self) {
        self.operation_aborts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of per-container metrics at query time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub operations_executed_total: u64,
    pub operation_errors_total: u64,
    pub operation_timeouts_total: u64,
    pub operation_aborts_total: u64,
    pub create_duration_ms: Option<u64>,
}

impl ContainerMetrics {
    pub(crate) fn from_storage(storage: &ContainerMetricsStorage) -> Self {
        Self {
            operations_executed_total: storage.operations_executed.load(Ordering::Relaxed),
            operation_errors_total: storage.operation_errors.load(Ordering::Relaxed),
            operation_timeouts_total: storage.operation_timeouts.load(Ordering::Relaxed),
            operation_aborts_total: storage.operation_aborts.load(Ordering::Relaxed),
            create_duration_ms: storage.create_duration_ms.get().copied(),
        }
    }

    /// Operations that reached the runtime on this container.
    pub fn operations_executed_total(&self) -> u64 {
        self.operations_executed_total
    }

    /// Failed operations on this container, timeouts and aborts included.
    pub fn operation_errors_total(&self) -> u64 {
        self.operation_errors_total
    }

    pub fn operation_timeouts_total(&self) -> u64 {
        self.operation_timeouts_total
    }

    pub fn operation_aborts_total(&self) -> u64 {
        self.operation_aborts_total
    }

    /// Returns None until the container becomes ready.
    pub fn create_duration_ms(&self) -> Option<u64> {
        self.create_duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_duration_set_once() {
        let storage = ContainerMetricsStorage::new();
        assert_eq!(ContainerMetrics::from_storage(&storage).create_duration_ms(), None);

        storage.set_create_duration(12);
        storage.set_create_duration(99);
        assert_eq!(
            ContainerMetrics::from_storage(&storage).create_duration_ms(),
            Some(12)
        );
    }

    #[test]
    fn test_counters() {
        let storage = ContainerMetricsStorage::new();
        storage.increment_operations_executed();
        storage.increment_operations_executed();
        storage.increment_operation_errors();
        storage.increment_operation_timeouts();

        let metrics = ContainerMetrics::from_storage(&storage);
        assert_eq!(metrics.operations_executed_total(), 2);
        assert_eq!(metrics.operation_errors_total(), 1);
        assert_eq!(metrics.operation_timeouts_total(), 1);
        assert_eq!(metrics.operation_aborts_total(), 0);
    }
}
