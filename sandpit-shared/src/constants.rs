//! Shared constants between the orchestrator and its collaborators
//!
//! Providers and test helpers read these so that defaults line up with the
//! orchestrator without depending on it.

/// Orchestrator-wide defaults.
pub mod defaults {
    /// Default ceiling on live containers.
    pub const MAX_CONTAINERS: usize = 32;

    /// Default per-operation timeout in milliseconds.
    pub const OPERATION_TIMEOUT_MS: u64 = 30_000;

    /// Bound on releasing a runtime during teardown, in milliseconds.
    pub const RELEASE_TIMEOUT_MS: u64 = 10_000;

    /// Default idle threshold in milliseconds (5 minutes).
    pub const IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

    /// Prefix used by the default counter-based identifier generator.
    pub const ID_PREFIX: &str = "container";

    /// Default working directory inside a container filesystem.
    pub const WORKING_DIR: &str = "/workspace";

    /// Capacity of the event broadcast channel.
    pub const EVENT_CAPACITY: usize = 256;
}

/// Idle reaper interval bounds.
pub mod reaper {
    use std::time::Duration;

    /// Lower bound on the sweep interval.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// Upper bound on the sweep interval.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

    /// Sweep interval is the idle threshold divided by this factor.
    pub const IDLE_DIVISOR: u32 = 2;
}

/// Well-known file names inside a container filesystem.
pub mod files {
    /// Package manifest written by the installer.
    pub const MANIFEST: &str = "package.json";

    /// Directory that receives installed packages.
    pub const MODULES_DIR: &str = "node_modules";
}

/// Log output naming.
pub mod logging {
    /// Base name of the daily-rotated log file.
    pub const LOG_FILE: &str = "sandpit.log";

    /// Filter used when `RUST_LOG` is unset.
    pub const DEFAULT_FILTER: &str = "info";
}
