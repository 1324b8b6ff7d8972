//! Runtime provider abstraction.
//!
//! The orchestrator never talks to a concrete execution engine. It asks a
//! [`RuntimeProvider`] for a [`RuntimeHandle`] bound to a container
//! filesystem and dispatches work through that handle.
//!
//! Two backing strategies exist:
//! - **Inline**: the handle runs on the caller's task (any plain provider).
//! - **Worker**: the handle is hosted on a dedicated actor task
//!   ([`WorkerProvider`]), so a panicking engine cannot take the caller down.

mod select;
mod worker;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde::{Deserialize, Serialize};

use crate::fs::SharedFs;

pub use select::ProviderSet;
pub use worker::WorkerProvider;

/// Execution strategy actually used by a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Inline,
    Worker,
}

impl RuntimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Inline => "inline",
            RuntimeMode::Worker => "worker",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested execution strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimePreference {
    /// Prefer worker isolation, fall back to inline.
    #[default]
    Auto,
    Worker,
    Inline,
}

impl RuntimePreference {
    /// Whether a provider of `mode` may serve this preference.
    pub fn accepts(&self, mode: RuntimeMode) -> bool {
        match self {
            RuntimePreference::Auto => true,
            RuntimePreference::Worker => mode == RuntimeMode::Worker,
            RuntimePreference::Inline => mode == RuntimeMode::Inline,
        }
    }
}

impl FromStr for RuntimePreference {
    type Err = SandpitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(RuntimePreference::Auto),
            "worker" => Ok(RuntimePreference::Worker),
            "inline" => Ok(RuntimePreference::Inline),
            _ => Err(SandpitError::Config(format!(
                "Unknown runtime preference: '{}'. Supported: auto, worker, inline",
                s
            ))),
        }
    }
}

/// Configuration handed to a provider when constructing a runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Container identifier, for provider-side logging.
    pub container_id: String,
    pub working_dir: String,
    pub env: HashMap<String, String>,
}

/// Outcome of running code inside a runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Value exported by the executed module.
    pub exports: serde_json::Value,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn new(exports: serde_json::Value) -> Self {
        Self {
            exports,
            ..Default::default()
        }
    }
}

/// A live runtime bound to one container filesystem.
#[async_trait]
pub trait RuntimeHandle: Send + Sync {
    async fn execute(&self, code: &str, filename: Option<&str>) -> SandpitResult<ExecutionResult>;

    async fn run_file(&self, filename: &str) -> SandpitResult<ExecutionResult>;

    /// Release the runtime. Called exactly once, during teardown.
    async fn terminate(&self) -> SandpitResult<()>;
}

/// Factory for runtime handles.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Strategy this provider implements.
    fn mode(&self) -> RuntimeMode;

    async fn create(
        &self,
        fs: SharedFs,
        options: &RuntimeOptions,
    ) -> SandpitResult<Arc<dyn RuntimeHandle>>;
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
