//! Sandpit Shared - Common code for the orchestrator and its collaborators
//!
//! This crate contains the error taxonomy and the constants used by the
//! orchestrator (`sandpit`) as well as by runtime providers and test helpers
//! that plug into it.

pub mod constants;
pub mod errors;

pub use errors::{ErrorKind, SandpitError, SandpitResult};
