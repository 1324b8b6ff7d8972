//! Public orchestrator facade.

use std::sync::Arc;

use futures::future::join_all;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio::sync::broadcast;

use crate::container::gate;
use crate::container::lifecycle;
use crate::engine::ExecutionResult;
use crate::events::ContainerEvent;
use crate::fs::FsSnapshot;
use crate::installer::{InstallOptions, InstallResult};
use crate::metrics::RuntimeMetrics;
use crate::runtime::reaper;
use crate::runtime::rt_impl::{CreateRequest, SharedRuntimeImpl};
use crate::runtime::options::{CloneOptions, OperationOptions, SandpitOptions, SpawnOptions};
use crate::runtime::types::{ContainerInfo, OperationKind, TerminationReason};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Entry point for spawning and driving sandboxed containers.
///
/// Operations on one container run one at a time in submission order;
/// different containers proceed independently.
///
/// **Cloning**: cheap, all clones share the same registry and counters.
/// Dropping the last clone stops the idle reaper but does not tear down live
/// containers; call [`dispose`](Self::dispose) for that.
#[derive(Clone)]
pub struct SandpitRuntime {
    inner: SharedRuntimeImpl,
}

impl SandpitRuntime {
    pub(crate) fn from_inner(inner: SharedRuntimeImpl) -> Self {
        Self { inner }
    }

    pub fn options(&self) -> &SandpitOptions {
        &self.inner.options
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    /// Create a container and wait until its runtime is ready.
    ///
    /// # Errors
    ///
    /// - `Capacity` when the live ceiling is reached (registry untouched)
    /// - `AlreadyExists` for a duplicate id
    /// - `Construction` when the runtime fails to start (record removed)
    /// - `Disposed` after [`dispose`](Self::dispose)
    pub async fn spawn(&self, options: SpawnOptions) -> SandpitResult<ContainerInfo> {
        let rt = &self.inner;

        let mut env = rt.options.default_env.clone();
        env.extend(options.env);

        let request = CreateRequest {
            id: options.id,
            snapshot: options.snapshot,
            files: options.files.into_iter().collect(),
            working_dir: rt.working_dir(options.working_dir.as_deref())?,
            env,
            metadata: options.metadata,
            runtime: options.runtime.unwrap_or(rt.options.default_runtime),
            parent: None,
        };
        rt.create(request).await
    }

    /// Spawn an independent container from a snapshot of `id`.
    ///
    /// Working directory, environment, metadata and runtime preference are
    /// inherited unless `options` overrides them. Later writes in either
    /// container are invisible to the other.
    pub async fn clone_container(
        &self,
        id: &str,
        options: CloneOptions,
    ) -> SandpitResult<ContainerInfo> {
        let rt = &self.inner;
        if rt.is_disposed() {
            return Err(SandpitError::Disposed);
        }

        let source = rt.lookup(id)?;
        let snapshot = source.snapshot();
        let config = &source.config;

        let working_dir = match options.working_dir {
            Some(dir) => rt.working_dir(Some(&dir))?,
            None => config.working_dir.clone(),
        };

        tracing::debug!(
            container_id = %config.id,
            files = snapshot.len(),
            "Cloning container"
        );
        let request = CreateRequest {
            id: options.id,
            snapshot: Some(snapshot),
            files: Vec::new(),
            working_dir,
            env: options.env.unwrap_or_else(|| config.env.clone()),
            metadata: options.metadata.unwrap_or_else(|| config.metadata.clone()),
            runtime: options.runtime.unwrap_or(config.runtime),
            parent: Some(config.id.clone()),
        };
        rt.create(request).await
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Evaluate `code` in the container's runtime.
    pub async fn execute(
        &self,
        id: &str,
        code: &str,
        filename: Option<&str>,
        options: OperationOptions,
    ) -> SandpitResult<ExecutionResult> {
        let rt = &self.inner;
        let container = rt.lookup(id)?;
        let code = code.to_string();
        let filename = filename.map(str::to_string);

        let target = Arc::clone(&container);
        gate::enqueue(
            rt,
            &container,
            OperationKind::Execute,
            rt.gate_options(options),
            move || {
                let handle = target.handle();
                async move { handle?.execute(&code, filename.as_deref()).await }
            },
        )
        .await
    }

    /// Run a file from the container's filesystem.
    pub async fn run_file(
        &self,
        id: &str,
        filename: &str,
        options: OperationOptions,
    ) -> SandpitResult<ExecutionResult> {
        let rt = &self.inner;
        let container = rt.lookup(id)?;
        let filename = filename.to_string();

        let target = Arc::clone(&container);
        gate::enqueue(
            rt,
            &container,
            OperationKind::RunFile,
            rt.gate_options(options),
            move || {
                let handle = target.handle();
                async move { handle?.run_file(&filename).await }
            },
        )
        .await
    }

    /// Install packages into the container's working directory.
    pub async fn install(
        &self,
        id: &str,
        spec: &str,
        install_options: InstallOptions,
        options: OperationOptions,
    ) -> SandpitResult<InstallResult> {
        let rt = &self.inner;
        let container = rt.lookup(id)?;
        let spec = spec.to_string();

        let target = Arc::clone(&container);
        gate::enqueue(
            rt,
            &container,
            OperationKind::Install,
            rt.gate_options(options),
            move || {
                let installer = target.installer();
                async move { installer?.install(&spec, &install_options).await }
            },
        )
        .await
    }

    /// Copy the container's full filesystem content.
    ///
    /// Not serialized with operations: reflects writes completed so far.
    pub fn snapshot(&self, id: &str) -> SandpitResult<FsSnapshot> {
        Ok(self.inner.lookup(id)?.snapshot())
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Terminate a container after its queued operations drain.
    ///
    /// Returns false when `id` is unknown. Concurrent callers all wait for
    /// the same teardown.
    pub async fn terminate(&self, id: &str) -> SandpitResult<bool> {
        let Some(container) = self.inner.manager.get(id) else {
            return Ok(false);
        };
        lifecycle::terminate(&self.inner, &container, TerminationReason::Explicit).await?;
        Ok(true)
    }

    /// Terminate every live container. Returns how many were torn down.
    pub async fn terminate_all(&self) -> SandpitResult<usize> {
        self.terminate_every(TerminationReason::Explicit).await
    }

    /// Stop the idle reaper and terminate everything.
    ///
    /// Idempotent. Spawns and clones fail with `Disposed` afterwards.
    pub async fn dispose(&self) -> SandpitResult<()> {
        if self.inner.mark_disposed() {
            tracing::info!(live = self.inner.manager.count(), "Disposing runtime");
        }
        self.inner.reaper.cancel();
        self.terminate_every(TerminationReason::Disposed).await?;
        Ok(())
    }

    async fn terminate_every(&self, reason: TerminationReason) -> SandpitResult<usize> {
        let teardowns: Vec<_> = self
            .inner
            .manager
            .list()
            .iter()
            .map(|container| lifecycle::terminate(&self.inner, container, reason))
            .collect();
        let count = teardowns.len();

        join_all(teardowns)
            .await
            .into_iter()
            .collect::<SandpitResult<Vec<()>>>()?;
        Ok(count)
    }

    /// Run one idle sweep now. Returns how many containers were evicted.
    pub async fn reap_idle(&self) -> usize {
        reaper::reap_idle(&self.inner).await
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get(&self, id: &str) -> Option<ContainerInfo> {
        self.inner.manager.get(id).map(|c| c.info())
    }

    /// All live containers in creation order.
    pub fn list(&self) -> Vec<ContainerInfo> {
        self.inner.manager.list().iter().map(|c| c.info()).collect()
    }

    /// Counters plus live gauges sampled now.
    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::collect(&self.inner.metrics, self.inner.manager.gauges())
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl std::fmt::Debug for SandpitRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandpitRuntime")
            .field("live", &self.inner.manager.count())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}
