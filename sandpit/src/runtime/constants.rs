//! Constants for the sandpit runtime.
//!
//! Defaults shared with collaborators live in `sandpit-shared`; this module
//! re-exports them next to the runtime-only names.

pub use sandpit_shared::constants::{defaults, files, logging, reaper};

/// Environment variables read by `SandpitOptions::default()`.
pub mod envs {
    pub const SANDPIT_MAX_CONTAINERS: &str = "SANDPIT_MAX_CONTAINERS";
    pub const SANDPIT_DEFAULT_TIMEOUT_MS: &str = "SANDPIT_DEFAULT_TIMEOUT_MS";
    pub const SANDPIT_IDLE_TIMEOUT_MS: &str = "SANDPIT_IDLE_TIMEOUT_MS";
    pub const SANDPIT_LOG_DIR: &str = "SANDPIT_LOG_DIR";
}

/// Upper bound on identifier generation attempts before spawn gives up.
pub const MAX_ID_ATTEMPTS: usize = 16;
