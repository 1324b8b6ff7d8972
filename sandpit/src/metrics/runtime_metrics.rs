//! Runtime-level metrics (aggregate across all containers).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sandpit_shared::errors::SandpitError;

/// Storage for runtime-wide metrics.
///
/// Owned by the runtime, shared across all operations.
/// All counters are monotonic (never decrease).
#[derive(Clone, Default, Debug)]
pub struct RuntimeMetricsStorage {
    /// Containers whose spawn was accepted
    pub(crate) containers_created: Arc<AtomicU64>,
    /// Containers that reached terminated (explicit or evicted)
    pub(crate) containers_terminated: Arc<AtomicU64>,
    /// Containers removed by the idle reaper
    pub(crate) containers_evicted: Arc<AtomicU64>,
    /// Containers whose runtime construction failed
    pub(crate) containers_failed: Arc<AtomicU64>,
    pub(crate) operations_started: Arc<AtomicU64>,
    pub(crate) operations_succeeded: Arc<AtomicU64>,
    /// Every failed operation, timeouts and aborts included
    pub(crate) operations_failed: Arc<AtomicU64>,
    pub(crate) operations_timed_out: Arc<AtomicU64>,
    pub(crate) operations_aborted: Arc<AtomicU64>,
}

impl RuntimeMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_containers_created(&self) {
        self.containers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_containers_terminated(&self) {
        self.containers_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_containers_evicted(&self) {
        self.containers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_containers_failed(&self) {
        self.containers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_operations_started(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_operations_succeeded(&self) {
        self.operations_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed operation, plus its timeout/abort counter when it applies.
    pub(crate) fn record_operation_failure(&self, error: &SandpitError) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
        if error.is_timeout() {
            self.operations_timed_out.fetch_add(1, Ordering::Relaxed);
        }
        if error.is_aborted() {
            self.operations_aborted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Live gauges sampled from the registry at query time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveGauges {
    pub live_containers: u64,
    pub busy_containers: u64,
    pub active_operations: u64,
    pub pending_operations: u64,
}

/// Point-in-time snapshot of runtime-wide metrics.
///
/// Counters are monotonic and never reset; gauges reflect the registry at
/// the moment the snapshot was taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub containers_created_total: u64,
    pub containers_terminated_total: u64,
    pub containers_evicted_total: u64,
    pub containers_failed_total: u64,
    pub operations_started_total: u64,
    pub operations_succeeded_total: u64,
    pub operations_failed_total: u64,
    pub operations_timed_out_total: u64,
    pub operations_aborted_total: u64,
    #[serde(flatten)]
    pub gauges: LiveGauges,
}

impl RuntimeMetrics {
    pub(crate) fn collect(storage: &RuntimeMetricsStorage, gauges: LiveGauges) -> Self {
        Self {
            containers_created_total: storage.containers_created.load(Ordering::Relaxed),
            containers_terminated_total: storage.containers_terminated.load(Ordering::Relaxed),
            containers_evicted_total: storage.containers_evicted.load(Ordering::Relaxed),
            containers_failed_total: storage.containers_failed.load(Ordering::Relaxed),
            operations_started_total: storage.operations_started.load(Ordering::Relaxed),
            operations_succeeded_total: storage.operations_succeeded.load(Ordering::Relaxed),
            operations_failed_total: storage.operations_failed.load(Ordering::Relaxed),
            operations_timed_out_total: storage.operations_timed_out.load(Ordering::Relaxed),
            operations_aborted_total: storage.operations_aborted.load(Ordering::Relaxed),
            gauges,
        }
    }

    /// Incremented when a spawn passes the capacity and duplicate checks.
    pub fn containers_created_total(&self) -> u64 {
        self.containers_created_total
    }

    pub fn containers_terminated_total(&self) -> u64 {
        self.containers_terminated_total
    }

    /// Subset of terminated containers removed by the idle reaper.
    pub fn containers_evicted_total(&self) -> u64 {
        self.containers_evicted_total
    }

    /// Spawns whose runtime construction failed.
    pub fn containers_failed_total(&self) -> u64 {
        self.containers_failed_total
    }

    pub fn operations_started_total(&self) -> u64 {
        self.operations_started_total
    }

    pub fn operations_succeeded_total(&self) -> u64 {
        self.operations_succeeded_total
    }

    /// Every failure kind, timeouts and aborts included.
    pub fn operations_failed_total(&self) -> u64 {
        self.operations_failed_total
    }

    pub fn operations_timed_out_total(&self) -> u64 {
        self.operations_timed_out_total
    }

    pub fn operations_aborted_total(&self) -> u64 {
        self.operations_aborted_total
    }

    /// Containers currently registered, in any status.
    pub fn num_live_containers(&self) -> u64 {
        self.gauges.live_containers
    }

    pub fn num_busy_containers(&self) -> u64 {
        self.gauges.busy_containers
    }

    pub fn num_active_operations(&self) -> u64 {
        self.gauges.active_operations
    }

    pub fn num_pending_operations(&self) -> u64 {
        self.gauges.pending_operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_counters() {
        let storage = RuntimeMetricsStorage::new();
        storage.record_operation_failure(&SandpitError::Execution("boom".into()));
        storage.record_operation_failure(&SandpitError::Timeout {
            id: "c".into(),
            operation: "execute".into(),
            timeout: Duration::from_millis(5),
        });
        storage.record_operation_failure(&SandpitError::Aborted {
            id: "c".into(),
            operation: "execute".into(),
        });

        let metrics = RuntimeMetrics::collect(&storage, LiveGauges::default());
        assert_eq!(metrics.operations_failed_total(), 3);
        assert_eq!(metrics.operations_timed_out_total(), 1);
        assert_eq!(metrics.operations_aborted_total(), 1);
        assert_eq!(metrics.operations_succeeded_total(), 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let storage = RuntimeMetricsStorage::new();
        let other = storage.clone();
        other.increment_containers_created();
        other.increment_containers_created();

        let metrics = RuntimeMetrics::collect(
            &storage,
            LiveGauges {
                live_containers: 2,
                ..Default::default()
            },
        );
        assert_eq!(metrics.containers_created_total(), 2);
        assert_eq!(metrics.num_live_containers(), 2);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let metrics = RuntimeMetrics::collect(&RuntimeMetricsStorage::new(), LiveGauges::default());
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["live_containers"], 0);
        assert_eq!(json["operations_started_total"], 0);
    }
}
