//! Container record - holds config, state, filesystem and the live runtime.

// ============================================================================
// IMPORTS
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::config::ContainerConfig;
use super::state::{ContainerState, ContainerStatus};
use crate::engine::{RuntimeHandle, RuntimeMode};
use crate::events::{ContainerEvent, EventBus};
use crate::fs::{FsSnapshot, SharedFs};
use crate::installer::PackageInstaller;
use crate::metrics::ContainerMetricsStorage;
use crate::runtime::types::{ContainerID, ContainerInfo};

// ============================================================================
// TYPE ALIASES
// ============================================================================

pub(crate) type SharedContainerImpl = Arc<ContainerImpl>;

/// Teardown result shared by every caller of `terminate` on one container.
pub(crate) type TeardownFuture = Shared<BoxFuture<'static, SandpitResult<()>>>;

// ============================================================================
// LIVE STATE
// ============================================================================

/// Resources that exist only once the runtime has been constructed.
pub(crate) struct LiveState {
    pub(crate) handle: Arc<dyn RuntimeHandle>,
    pub(crate) installer: Arc<dyn PackageInstaller>,
}

// ============================================================================
// CONTAINER IMPL
// ============================================================================

pub(crate) struct ContainerImpl {
    // --- Always available ---
    pub(crate) config: ContainerConfig,
    pub(crate) state: Mutex<ContainerState>,
    pub(crate) fs: SharedFs,
    pub(crate) metrics: ContainerMetricsStorage,

    /// Single FIFO permit: at most one operation in flight.
    gate: Arc<Semaphore>,

    /// Set once, by the first terminate caller.
    teardown: Mutex<Option<TeardownFuture>>,

    // --- Set when construction succeeds, taken during teardown ---
    live: Mutex<Option<LiveState>>,
}

impl ContainerImpl {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    pub(crate) fn new(config: ContainerConfig, fs: SharedFs, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: Mutex::new(ContainerState::new(now)),
            fs,
            metrics: ContainerMetricsStorage::new(),
            gate: Arc::new(Semaphore::new(1)),
            teardown: Mutex::new(None),
            live: Mutex::new(None),
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub(crate) fn id(&self) -> &ContainerID {
        &self.config.id
    }

    pub(crate) fn status(&self) -> ContainerStatus {
        self.state.lock().status
    }

    pub(crate) fn info(&self) -> ContainerInfo {
        let state = self.state.lock();
        ContainerInfo::new(&self.config, &state, &self.metrics)
    }

    pub(crate) fn snapshot(&self) -> FsSnapshot {
        self.fs.snapshot()
    }

    /// Error for callers arriving after teardown started.
    pub(crate) fn finalizing_error(&self) -> SandpitError {
        SandpitError::Finalizing {
            id: self.id().to_string(),
            status: self.status().to_string(),
        }
    }

    // ========================================================================
    // STATUS
    // ========================================================================

    /// Validated transition, logged and published while the lock is held.
    pub(crate) fn transition(
        &self,
        state: &mut ContainerState,
        to: ContainerStatus,
        now: DateTime<Utc>,
        events: &EventBus,
    ) -> SandpitResult<()> {
        let from = state.transition_to(to, now)?;
        tracing::debug!(
            container_id = %self.id(),
            from = %from,
            to = %to,
            "Container status changed"
        );
        events.emit(ContainerEvent::ContainerStatus {
            id: self.id().clone(),
            from,
            to,
        });
        Ok(())
    }

    /// Busy while work is admitted, ready otherwise. No-op outside ready/busy.
    pub(crate) fn settle_status(
        &self,
        state: &mut ContainerState,
        now: DateTime<Utc>,
        events: &EventBus,
    ) {
        if !state.status.follows_gate() {
            return;
        }
        let target = if state.pending_operations > 0 {
            ContainerStatus::Busy
        } else {
            ContainerStatus::Ready
        };
        if state.status != target {
            let _ = self.transition(state, target, now, events);
        }
    }

    /// Move to terminating unless already finalizing. Returns true on change.
    pub(crate) fn mark_terminating(&self, now: DateTime<Utc>, events: &EventBus) -> bool {
        let mut state = self.state.lock();
        if state.status.is_finalizing() {
            return false;
        }
        self.transition(&mut state, ContainerStatus::Terminating, now, events)
            .is_ok()
    }

    /// Atomically claim this container for idle eviction.
    ///
    /// Succeeds only when it is ready, has nothing admitted, and has been
    /// unused for longer than `threshold`. Returns how long it was idle.
    pub(crate) fn try_mark_evicted(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        events: &EventBus,
    ) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.is_idle() {
            return None;
        }
        let idle_for = (now - state.last_used_at).to_std().ok()?;
        if idle_for <= threshold {
            return None;
        }
        self.transition(&mut state, ContainerStatus::Terminating, now, events)
            .ok()?;
        Some(idle_for)
    }

    // ========================================================================
    // GATE
    // ========================================================================

    /// Queue for the operation permit, in arrival order.
    pub(crate) async fn acquire_permit(&self) -> SandpitResult<OwnedSemaphorePermit> {
        Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| self.finalizing_error())
    }

    /// Take the permit without waiting. Only succeeds on an idle gate.
    pub(crate) fn try_acquire_permit(&self) -> SandpitResult<OwnedSemaphorePermit> {
        Arc::clone(&self.gate).try_acquire_owned().map_err(|_| {
            SandpitError::Internal(format!("gate of container {} is busy", self.id()))
        })
    }

    /// Reject every queued and future acquisition.
    pub(crate) fn close_gate(&self) {
        self.gate.close();
    }

    // ========================================================================
    // LIVE STATE
    // ========================================================================

    pub(crate) fn set_live(&self, live: LiveState, mode: RuntimeMode) {
        *self.live.lock() = Some(live);
        self.state.lock().runtime_mode = Some(mode);
    }

    pub(crate) fn take_live(&self) -> Option<LiveState> {
        self.live.lock().take()
    }

    pub(crate) fn handle(&self) -> SandpitResult<Arc<dyn RuntimeHandle>> {
        self.live
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.handle))
            .ok_or_else(|| self.runtime_unavailable())
    }

    pub(crate) fn installer(&self) -> SandpitResult<Arc<dyn PackageInstaller>> {
        self.live
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.installer))
            .ok_or_else(|| self.runtime_unavailable())
    }

    fn runtime_unavailable(&self) -> SandpitError {
        SandpitError::Engine(format!(
            "runtime of container {} is not available",
            self.id()
        ))
    }

    // ========================================================================
    // TEARDOWN SLOT
    // ========================================================================

    /// Return the in-flight teardown, or install the one built by `start`.
    ///
    /// `start` runs at most once per container, under the slot lock.
    pub(crate) fn teardown_or_start(
        &self,
        start: impl FnOnce() -> TeardownFuture,
    ) -> TeardownFuture {
        let mut slot = self.teardown.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let teardown = start();
        *slot = Some(teardown.clone());
        teardown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuntimePreference;
    use crate::fs::MemFs;
    use futures::FutureExt;
    use std::collections::HashMap;

    pub(crate) fn container(id: &str, now: DateTime<Utc>) -> ContainerImpl {
        let config = ContainerConfig {
            id: ContainerID::new(id),
            working_dir: "/workspace".into(),
            env: HashMap::new(),
            metadata: HashMap::new(),
            runtime: RuntimePreference::Auto,
            parent: None,
            created_at: now,
            sequence: 0,
        };
        ContainerImpl::new(config, Arc::new(MemFs::new()), now)
    }

    #[test]
    fn test_settle_status_follows_pending() {
        let now = Utc::now();
        let events = EventBus::new(8);
        let c = container("c-1", now);
        let mut state = c.state.lock();
        state.force_status(ContainerStatus::Ready, now);

        state.pending_operations = 2;
        c.settle_status(&mut state, now, &events);
        assert_eq!(state.status, ContainerStatus::Busy);

        state.pending_operations = 0;
        c.settle_status(&mut state, now, &events);
        assert_eq!(state.status, ContainerStatus::Ready);

        state.force_status(ContainerStatus::Errored, now);
        state.pending_operations = 1;
        c.settle_status(&mut state, now, &events);
        assert_eq!(state.status, ContainerStatus::Errored);
    }

    #[test]
    fn test_eviction_claim_requires_idle_past_threshold() {
        let created = Utc::now();
        let events = EventBus::new(8);
        let c = container("c-1", created);
        c.state.lock().force_status(ContainerStatus::Ready, created);

        let threshold = Duration::from_secs(10);
        let soon = created + chrono::Duration::seconds(5);
        assert!(c.try_mark_evicted(soon, threshold, &events).is_none());

        c.state.lock().pending_operations = 1;
        let later = created + chrono::Duration::seconds(30);
        assert!(c.try_mark_evicted(later, threshold, &events).is_none());

        c.state.lock().pending_operations = 0;
        let idle_for = c.try_mark_evicted(later, threshold, &events).unwrap();
        assert_eq!(idle_for, Duration::from_secs(30));
        assert_eq!(c.status(), ContainerStatus::Terminating);

        // Already claimed.
        assert!(c.try_mark_evicted(later, threshold, &events).is_none());
    }

    #[test]
    fn test_mark_terminating_once() {
        let now = Utc::now();
        let events = EventBus::new(8);
        let c = container("c-1", now);
        assert!(c.mark_terminating(now, &events));
        assert!(!c.mark_terminating(now, &events));
    }

    #[tokio::test]
    async fn test_teardown_slot_starts_once() {
        let c = container("c-1", Utc::now());
        let mut starts = 0;
        let first = c.teardown_or_start(|| {
            starts += 1;
            async { Ok(()) }.boxed().shared()
        });
        let second = c.teardown_or_start(|| unreachable!());
        assert_eq!(starts, 1);
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_gate_reports_finalizing() {
        let c = container("c-1", Utc::now());
        c.close_gate();
        let err = c.acquire_permit().await.unwrap_err();
        assert!(matches!(err, SandpitError::Finalizing { .. }));
    }

    #[test]
    fn test_handle_missing_before_ready() {
        let c = container("c-1", Utc::now());
        assert!(c.handle().is_err());
        assert!(c.installer().is_err());
        assert!(c.take_live().is_none());
    }
}
