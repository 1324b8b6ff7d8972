//! Container lifecycle: runtime construction and teardown.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use super::container_impl::{LiveState, SharedContainerImpl, TeardownFuture};
use super::gate::{self, GateOptions};
use super::state::ContainerStatus;
use crate::events::ContainerEvent;
use crate::runtime::constants::defaults;
use crate::runtime::rt_impl::{RuntimeImpl, SharedRuntimeImpl};
use crate::runtime::types::{ContainerInfo, OperationKind, TerminationReason};

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Build the runtime of a freshly registered container.
///
/// `permit` is the container's gate permit, taken before registration so
/// that operations submitted meanwhile queue behind construction.
pub(crate) async fn construct(
    rt: &RuntimeImpl,
    container: &SharedContainerImpl,
    permit: OwnedSemaphorePermit,
) -> SandpitResult<ContainerInfo> {
    let id = container.id().clone();
    let started = Instant::now();

    let built = build_live(rt, container).await;
    let now = rt.clock.now();

    let (live, mode) = match built {
        Ok(built) => built,
        Err(e) => {
            let message = e.to_string();
            {
                let mut state = container.state.lock();
                state.record_error(message.clone());
                if state.status == ContainerStatus::Creating {
                    let _ = container.transition(&mut state, ContainerStatus::Errored, now, &rt.events);
                }
            }
            tracing::error!(container_id = %id, error = %message, "Runtime construction failed");
            rt.events.emit(ContainerEvent::ContainerError {
                id: id.clone(),
                error: message.clone(),
            });
            rt.metrics.increment_containers_failed();

            container.close_gate();
            rt.manager.remove(container);
            drop(permit);

            return Err(SandpitError::Construction {
                id: id.to_string(),
                message,
            });
        }
    };

    container.set_live(live, mode);
    container
        .metrics
        .set_create_duration(started.elapsed().as_millis() as u64);

    let ready = {
        let mut state = container.state.lock();
        if state.status == ContainerStatus::Creating {
            container.transition(&mut state, ContainerStatus::Ready, now, &rt.events)?;
            // Operations queued during construction keep it busy.
            container.settle_status(&mut state, now, &rt.events);
            true
        } else {
            false
        }
    };
    drop(permit);

    if !ready {
        // Terminated while creating; the queued teardown releases the runtime.
        tracing::debug!(container_id = %id, "Container terminated during construction");
        return Err(container.finalizing_error());
    }

    tracing::info!(container_id = %id, mode = %mode, "Container ready");
    rt.events.emit(ContainerEvent::ContainerReady {
        id: id.clone(),
        mode,
    });

    Ok(container.info())
}

async fn build_live(
    rt: &RuntimeImpl,
    container: &SharedContainerImpl,
) -> SandpitResult<(LiveState, crate::engine::RuntimeMode)> {
    let (handle, mode) = rt
        .providers
        .create(
            Arc::clone(&container.fs),
            &container.config.runtime_options(),
            container.config.runtime,
        )
        .await?;

    let installer = match rt
        .installer_factory
        .create(Arc::clone(&container.fs), &container.config.working_dir)
    {
        Ok(installer) => installer,
        Err(e) => {
            // Do not leak the runtime we just built.
            if let Err(te) = handle.terminate().await {
                tracing::warn!(container_id = %container.id(), error = %te, "Failed to release runtime");
            }
            return Err(e);
        }
    };

    Ok((LiveState { handle, installer }, mode))
}

// ============================================================================
// TEARDOWN
// ============================================================================

/// Start (or join) the teardown of `container`.
///
/// The first caller moves the container to terminating and spawns the
/// teardown task; later callers get the same shared future.
pub(crate) fn terminate(
    rt: &SharedRuntimeImpl,
    container: &SharedContainerImpl,
    reason: TerminationReason,
) -> TeardownFuture {
    container.teardown_or_start(|| {
        container.mark_terminating(rt.clock.now(), &rt.events);
        tracing::debug!(container_id = %container.id(), reason = %reason, "Terminating container");

        let rt = Arc::clone(rt);
        let container = Arc::clone(container);
        let task = tokio::spawn(async move { teardown(&rt, &container, reason).await });

        async move {
            task.await
                .unwrap_or_else(|e| Err(SandpitError::Internal(format!("teardown task failed: {}", e))))
        }
        .boxed()
        .shared()
    })
}

async fn teardown(
    rt: &RuntimeImpl,
    container: &SharedContainerImpl,
    reason: TerminationReason,
) -> SandpitResult<()> {
    let id = container.id().clone();

    // Queue behind everything already admitted, then release the runtime.
    // A release that hangs is abandoned after the timeout.
    let owned = Arc::clone(container);
    let release = gate::enqueue(
        rt,
        container,
        OperationKind::Terminate,
        GateOptions {
            timeout: Some(Duration::from_millis(defaults::RELEASE_TIMEOUT_MS)),
            cancel: None,
        },
        move || {
            let live = owned.take_live();
            async move {
                match live {
                    Some(live) => live.handle.terminate().await,
                    None => Ok(()),
                }
            }
        },
    )
    .await;

    match release {
        Ok(()) => {}
        // Gate closed by a failed construction: nothing left to release.
        Err(SandpitError::Finalizing { .. }) => {}
        Err(e) => {
            tracing::warn!(container_id = %id, error = %e, "Runtime release failed, continuing teardown");
            container.state.lock().record_error(e.to_string());
            rt.events.emit(ContainerEvent::ContainerError {
                id: id.clone(),
                error: e.to_string(),
            });
        }
    }

    container.close_gate();
    {
        let mut state = container.state.lock();
        let now = rt.clock.now();
        if state.status != ContainerStatus::Terminating {
            state.force_status(ContainerStatus::Terminating, now);
        }
        container.transition(&mut state, ContainerStatus::Terminated, now, &rt.events)?;
    }
    rt.manager.remove(container);
    rt.metrics.increment_containers_terminated();

    tracing::info!(container_id = %id, reason = %reason, "Container terminated");
    rt.events.emit(ContainerEvent::ContainerTerminated { id, reason });

    Ok(())
}
