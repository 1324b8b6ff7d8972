//! Idle reaper: evicts containers that sat unused past the idle threshold.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::container::lifecycle;
use crate::events::ContainerEvent;
use crate::runtime::rt_impl::{RuntimeImpl, SharedRuntimeImpl};
use crate::runtime::types::TerminationReason;

/// Sweep every `interval` until `token` is cancelled or the runtime is gone.
pub(crate) async fn run(rt: Weak<RuntimeImpl>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(interval_ms = interval.as_millis() as u64, "Idle reaper started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(rt) = rt.upgrade() else { break };
                reap_idle(&rt).await;
            }
        }
    }
    tracing::debug!("Idle reaper stopped");
}

/// Run one sweep. Returns how many containers were evicted.
///
/// A sweep that starts while another is running returns 0 immediately.
pub(crate) async fn reap_idle(rt: &SharedRuntimeImpl) -> usize {
    let Some(threshold) = rt.options.idle_timeout() else {
        return 0;
    };
    let Some(_sweep) = SweepGuard::try_acquire(&rt.sweeping) else {
        tracing::debug!("Idle sweep already running, skipping");
        return 0;
    };

    let now = rt.clock.now();
    let mut teardowns = Vec::new();
    for container in rt.manager.list() {
        let Some(idle_for) = container.try_mark_evicted(now, threshold, &rt.events) else {
            continue;
        };
        rt.metrics.increment_containers_evicted();
        tracing::info!(
            container_id = %container.id(),
            idle_ms = idle_for.as_millis() as u64,
            "Evicting idle container"
        );
        rt.events.emit(ContainerEvent::ContainerEvicted {
            id: container.id().clone(),
            idle_for,
        });
        teardowns.push(lifecycle::terminate(
            rt,
            &container,
            TerminationReason::IdleEviction,
        ));
    }

    let evicted = teardowns.len();
    for result in join_all(teardowns).await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "Idle eviction teardown failed");
        }
    }
    evicted
}

struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = SweepGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(SweepGuard::try_acquire(&flag).is_none());

        drop(first);
        assert!(SweepGuard::try_acquire(&flag).is_some());
    }
}
