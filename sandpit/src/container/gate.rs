//! Operation gate: per-container FIFO admission with timeout and abort.
//!
//! Every stateful operation passes through [`enqueue`]. Admission is
//! synchronous (pending count and status check happen before the first
//! await), so same-container submissions start in the order they were
//! first polled. The work itself runs on its own task: a timeout or abort
//! unblocks the caller and frees the gate while the work keeps running
//! detached.

use std::future::Future;
use std::time::Duration;

use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::container_impl::SharedContainerImpl;
use super::state::{ContainerState, ContainerStatus};
use crate::events::ContainerEvent;
use crate::runtime::rt_impl::RuntimeImpl;
use crate::runtime::types::{ContainerID, OperationKind, OperationOutcome};

/// Timeout and cancellation for one submission.
#[derive(Clone, Debug, Default)]
pub(crate) struct GateOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Run `work` on `container` once every earlier submission has finished.
///
/// Resolves with exactly one of: the work's value, a timeout, an abort, or
/// the work's own error.
pub(crate) async fn enqueue<T, F, Fut>(
    rt: &RuntimeImpl,
    container: &SharedContainerImpl,
    kind: OperationKind,
    options: GateOptions,
    work: F,
) -> SandpitResult<T>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = SandpitResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let id = container.id().clone();

    // Rejections count as failures but never as started, and emit no events.
    if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
        let err = aborted(&id, kind);
        record_failure(rt, container, &err);
        tracing::debug!(container_id = %id, operation = %kind, "Operation cancelled before submission");
        return Err(err);
    }

    let mut guard = Admission::admit(rt, container, kind).inspect_err(|e| {
        record_failure(rt, container, e);
    })?;

    let permit = tokio::select! {
        biased;
        _ = cancelled(options.cancel.as_ref()) => {
            let err = aborted(&id, kind);
            record_failure(rt, container, &err);
            tracing::debug!(container_id = %id, operation = %kind, "Operation aborted while queued");
            return Err(err);
        }
        permit = container.acquire_permit() => permit.inspect_err(|e| {
            record_failure(rt, container, e);
        })?,
    };

    guard.start();
    let started = Instant::now();

    let mut task = tokio::spawn(work());
    let result = tokio::select! {
        biased;
        joined = &mut task => joined.unwrap_or_else(|e| {
            Err(SandpitError::Engine(format!("{} task failed: {}", kind, e)))
        }),
        _ = sleep_for(options.timeout) => Err(SandpitError::Timeout {
            id: id.to_string(),
            operation: kind.to_string(),
            // Unreachable without a timeout; sleep_for never resolves then.
            timeout: options.timeout.unwrap_or_default(),
        }),
        _ = cancelled(options.cancel.as_ref()) => Err(aborted(&id, kind)),
    };
    // Timed out or aborted work keeps running detached.
    drop(task);

    let duration = started.elapsed();
    guard.finish(&result, duration);
    drop(permit);

    match &result {
        Ok(_) => tracing::debug!(
            container_id = %id,
            operation = %kind,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        ),
        Err(e) => tracing::warn!(
            container_id = %id,
            operation = %kind,
            duration_ms = duration.as_millis() as u64,
            error = %e,
            "Operation failed"
        ),
    }

    result
}

fn aborted(id: &ContainerID, kind: OperationKind) -> SandpitError {
    SandpitError::Aborted {
        id: id.to_string(),
        operation: kind.to_string(),
    }
}

fn record_failure(rt: &RuntimeImpl, container: &SharedContainerImpl, err: &SandpitError) {
    rt.metrics.record_operation_failure(err);
    container.metrics.increment_operation_errors();
    if err.is_timeout() {
        container.metrics.increment_operation_timeouts();
    }
    if err.is_aborted() {
        container.metrics.increment_operation_aborts();
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// ADMISSION
// ============================================================================

/// Tracks one submission's share of the pending/active counters.
///
/// Dropping it before `finish` (caller future dropped, queued abort)
/// releases the counters so the container can settle back to ready.
struct Admission<'a> {
    rt: &'a RuntimeImpl,
    container: &'a SharedContainerImpl,
    kind: OperationKind,
    started: bool,
    finished: bool,
}

impl<'a> Admission<'a> {
    fn admit(
        rt: &'a RuntimeImpl,
        container: &'a SharedContainerImpl,
        kind: OperationKind,
    ) -> SandpitResult<Self> {
        let mut state = container.state.lock();
        // Teardown itself is admitted while terminating.
        let admitted = match kind {
            OperationKind::Terminate => state.status == ContainerStatus::Terminating,
            _ => state.status.accepts_operations(),
        };
        if !admitted {
            return Err(SandpitError::Finalizing {
                id: container.id().to_string(),
                status: state.status.to_string(),
            });
        }

        state.pending_operations += 1;
        container.settle_status(&mut state, rt.clock.now(), &rt.events);

        Ok(Self {
            rt,
            container,
            kind,
            started: false,
            finished: false,
        })
    }

    fn start(&mut self) {
        {
            let mut state = self.container.state.lock();
            state.active_operations = 1;
            self.container
                .settle_status(&mut state, self.rt.clock.now(), &self.rt.events);
        }
        self.started = true;

        self.rt.metrics.increment_operations_started();
        self.container.metrics.increment_operations_executed();
        self.rt.events.emit(ContainerEvent::OperationStart {
            id: self.container.id().clone(),
            kind: self.kind,
        });
    }

    fn finish<T>(&mut self, result: &SandpitResult<T>, duration: Duration) {
        let id = self.container.id();
        let now = self.rt.clock.now();
        {
            let mut state = self.container.state.lock();
            self.release(&mut state);
            state.last_used_at = now;

            if let Err(e) = result {
                state.record_error(e.to_string());
                if e.is_fatal() && state.status.accepts_operations() {
                    if state.status != ContainerStatus::Errored {
                        let _ = self.container.transition(
                            &mut state,
                            ContainerStatus::Errored,
                            now,
                            &self.rt.events,
                        );
                    }
                    tracing::error!(container_id = %id, error = %e, "Runtime failed, container errored");
                    self.rt.events.emit(ContainerEvent::ContainerError {
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
            self.container.settle_status(&mut state, now, &self.rt.events);
        }
        self.finished = true;

        match result {
            Ok(_) => self.rt.metrics.increment_operations_succeeded(),
            Err(e) => record_failure(self.rt, self.container, e),
        }
        self.rt.events.emit(ContainerEvent::OperationEnd {
            id: id.clone(),
            kind: self.kind,
            duration,
            outcome: OperationOutcome::of(result),
        });
    }

    fn release(&self, state: &mut ContainerState) {
        state.pending_operations = state.pending_operations.saturating_sub(1);
        if self.started {
            state.active_operations = 0;
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.container.state.lock();
        self.release(&mut state);
        self.container
            .settle_status(&mut state, self.rt.clock.now(), &self.rt.events);
    }
}
