//! Shared runtime state and the container creation path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;

use crate::clock::SharedClock;
use crate::container::gate::GateOptions;
use crate::container::{ContainerConfig, ContainerImpl, SharedContainerImpl, lifecycle};
use crate::engine::{ProviderSet, RuntimePreference};
use crate::events::{ContainerEvent, EventBus};
use crate::fs::{FsSnapshot, MemFs, normalize_path, resolve_path};
use crate::installer::InstallerFactory;
use crate::management::ContainerManager;
use crate::metrics::RuntimeMetricsStorage;
use crate::runtime::constants::MAX_ID_ATTEMPTS;
use crate::runtime::options::{OperationOptions, SandpitOptions};
use crate::runtime::types::{ContainerID, ContainerInfo, IdGenerator};

pub(crate) type SharedRuntimeImpl = Arc<RuntimeImpl>;

/// Everything a runtime and its background tasks share.
///
/// Configuration and collaborators never change after build; mutable state
/// lives behind the registry, the per-container locks and atomics.
pub(crate) struct RuntimeImpl {
    pub(crate) options: SandpitOptions,
    pub(crate) manager: ContainerManager,
    pub(crate) events: EventBus,
    pub(crate) metrics: RuntimeMetricsStorage,
    pub(crate) clock: SharedClock,
    pub(crate) providers: ProviderSet,
    pub(crate) installer_factory: Arc<dyn InstallerFactory>,
    pub(crate) id_generator: Arc<dyn IdGenerator>,

    /// Set once by `dispose`; spawns and clones fail afterwards.
    disposed: AtomicBool,
    /// Held by the sweep in progress.
    pub(crate) sweeping: AtomicBool,
    /// Creation order handed to each new record.
    sequence: AtomicU64,
    /// Stops the background reaper.
    pub(crate) reaper: CancellationToken,

    _log_guard: Mutex<Option<WorkerGuard>>,
}

/// Fully resolved inputs for one new container.
pub(crate) struct CreateRequest {
    pub(crate) id: Option<String>,
    pub(crate) snapshot: Option<FsSnapshot>,
    pub(crate) files: Vec<(String, String)>,
    pub(crate) working_dir: String,
    pub(crate) env: HashMap<String, String>,
    pub(crate) metadata: HashMap<String, serde_json::Value>,
    pub(crate) runtime: RuntimePreference,
    pub(crate) parent: Option<ContainerID>,
}

impl RuntimeImpl {
    pub(crate) fn new(
        options: SandpitOptions,
        clock: SharedClock,
        providers: ProviderSet,
        installer_factory: Arc<dyn InstallerFactory>,
        id_generator: Arc<dyn IdGenerator>,
        log_guard: Option<WorkerGuard>,
    ) -> Self {
        let events = EventBus::new(options.event_capacity);
        Self {
            options,
            manager: ContainerManager::new(),
            events,
            metrics: RuntimeMetricsStorage::new(),
            clock,
            providers,
            installer_factory,
            id_generator,
            disposed: AtomicBool::new(false),
            sweeping: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            reaper: CancellationToken::new(),
            _log_guard: Mutex::new(log_guard),
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Flag the runtime as disposed and close the registry to new records.
    /// Returns false if it already was.
    pub(crate) fn mark_disposed(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::AcqRel);
        self.manager.close();
        first
    }

    pub(crate) fn lookup(&self, id: &str) -> SandpitResult<SharedContainerImpl> {
        self.manager
            .get(id)
            .ok_or_else(|| SandpitError::NotFound(id.to_string()))
    }

    /// Per-call options with the runtime default timeout filled in.
    pub(crate) fn gate_options(&self, options: OperationOptions) -> GateOptions {
        GateOptions {
            timeout: options.timeout.or_else(|| self.options.default_timeout()),
            cancel: options.cancel,
        }
    }

    /// Normalize a working directory, which must be absolute.
    pub(crate) fn working_dir(&self, dir: Option<&str>) -> SandpitResult<String> {
        let dir = dir.unwrap_or(&self.options.default_working_dir);
        if !dir.starts_with('/') {
            return Err(SandpitError::InvalidArgument(format!(
                "working directory must be absolute, got: {}",
                dir
            )));
        }
        normalize_path(dir)
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    /// Register a new record and construct its runtime.
    ///
    /// Resolves once the container is ready. On construction failure the
    /// record is already gone from the registry when the error is returned.
    pub(crate) async fn create(
        self: &Arc<Self>,
        request: CreateRequest,
    ) -> SandpitResult<ContainerInfo> {
        if self.is_disposed() {
            return Err(SandpitError::Disposed);
        }

        let fs = build_fs(&request)?;
        let id = self.resolve_id(request.id.as_deref())?;
        let now = self.clock.now();

        let config = ContainerConfig {
            id: id.clone(),
            working_dir: request.working_dir,
            env: request.env,
            metadata: request.metadata,
            runtime: request.runtime,
            parent: request.parent,
            created_at: now,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let container: SharedContainerImpl =
            Arc::new(ContainerImpl::new(config, Arc::new(fs), now));

        // Fresh gate, so this cannot fail; held until construction settles.
        let permit = container.try_acquire_permit()?;
        self.manager
            .register(Arc::clone(&container), self.options.max_containers)?;
        self.metrics.increment_containers_created();

        tracing::info!(
            container_id = %id,
            parent = ?container.config.parent,
            "Container created"
        );
        self.events.emit(ContainerEvent::ContainerCreated { id: id.clone() });

        // Detached so a dropped caller cannot strand the record in creating.
        let rt = Arc::clone(self);
        let task = tokio::spawn(async move { lifecycle::construct(&rt, &container, permit).await });
        task.await.map_err(|e| {
            SandpitError::Internal(format!("construction task for {} failed: {}", id, e))
        })?
    }

    fn resolve_id(&self, requested: Option<&str>) -> SandpitResult<ContainerID> {
        if let Some(id) = requested {
            if id.trim().is_empty() {
                return Err(SandpitError::InvalidArgument(
                    "container id must not be empty".into(),
                ));
            }
            return Ok(ContainerID::new(id));
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.id_generator.generate();
            if !self.manager.contains(id.as_str()) {
                return Ok(id);
            }
            tracing::debug!(container_id = %id, "Generated id already live, retrying");
        }
        Err(SandpitError::Internal(format!(
            "no free container id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }
}

impl Drop for RuntimeImpl {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

/// Container filesystem: snapshot content first, then seed files.
fn build_fs(request: &CreateRequest) -> SandpitResult<MemFs> {
    let fs = match &request.snapshot {
        Some(snapshot) => MemFs::from_snapshot(snapshot),
        None => MemFs::new(),
    };
    for (path, contents) in &request.files {
        let path = resolve_path(&request.working_dir, path)?;
        fs.write_file(&path, contents)?;
    }
    Ok(fs)
}
