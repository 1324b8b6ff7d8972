//! Sandpit - lifecycle and operation orchestrator for sandboxed containers.
//!
//! A [`SandpitRuntime`] owns a registry of containers. Each container pairs
//! an in-memory filesystem with a runtime built by a pluggable
//! [`RuntimeProvider`]. Operations on one container (execute, run a file,
//! install packages, terminate) are serialized through a FIFO gate with
//! per-call timeouts and cancellation; idle containers are evicted in the
//! background.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! use sandpit::{OperationOptions, RuntimeBuilder, SandpitOptions, SpawnOptions};
//!
//! # async fn demo(engine: Arc<dyn sandpit::RuntimeProvider>) -> sandpit::SandpitResult<()> {
//! let runtime = RuntimeBuilder::new(SandpitOptions::default())
//!     .provider(engine)
//!     .build()?;
//!
//! let info = runtime
//!     .spawn(SpawnOptions::new().with_file("main.js", "module.exports = 40 + 2;"))
//!     .await?;
//! let result = runtime
//!     .run_file(info.id.as_str(), "main.js", OperationOptions::new())
//!     .await?;
//! assert_eq!(result.exports, serde_json::json!(42));
//!
//! runtime.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod container;
pub mod engine;
pub mod events;
pub mod fs;
pub mod installer;
pub(crate) mod management;
pub mod metrics;
pub mod runtime;
pub mod util;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use container::{ContainerConfig, ContainerState, ContainerStatus};
pub use engine::{
    ExecutionResult, ProviderSet, RuntimeHandle, RuntimeMode, RuntimeOptions, RuntimePreference,
    RuntimeProvider, WorkerProvider,
};
pub use events::ContainerEvent;
pub use fs::{FsSnapshot, MemFs, SharedFs};
pub use installer::{
    InstallOptions, InstallResult, InstalledPackage, InstallerFactory, ManifestInstaller,
    ManifestInstallerFactory, PackageInstaller,
};
pub use metrics::{ContainerMetrics, RuntimeMetrics};
pub use runtime::options::{CloneOptions, OperationOptions, SandpitOptions, SpawnOptions};
pub use runtime::types::{
    ContainerID, ContainerInfo, CounterIdGenerator, IdGenerator, OperationKind, OperationOutcome,
    TerminationReason, UlidIdGenerator,
};
pub use runtime::{RuntimeBuilder, SandpitRuntime};
pub use sandpit_shared::{ErrorKind, SandpitError, SandpitResult};

// The facade is shared across tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SandpitRuntime>();
    assert_send_sync::<ContainerInfo>();
};
