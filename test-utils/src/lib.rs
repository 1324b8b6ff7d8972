//! Test helpers for sandpit integration tests.
//!
//! - [`ScriptProvider`]: a tiny scripted runtime, enough to drive the
//!   orchestrator without a real engine
//! - [`ExecProbe`]: records start order and peak concurrency of executions
//! - [`TestContext`]: a runtime wired to both, with a manual clock

mod context;
mod probe;
mod provider;
mod script;

pub use context::{TestContext, test_options};
pub use probe::ExecProbe;
pub use provider::ScriptProvider;
pub use script::Script;
