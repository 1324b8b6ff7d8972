//! Configuration for sandpit.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::RuntimePreference;
use crate::fs::FsSnapshot;
use crate::runtime::constants::{defaults, envs, reaper};

// ============================================================================
// Runtime Options
// ============================================================================

/// Runtime-wide configuration.
///
/// `Default` honours the `SANDPIT_*` environment overrides; fields missing
/// from a JSON document fall back to the same defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandpitOptions {
    /// Ceiling on live containers. Spawns beyond it fail with `Capacity`.
    #[serde(default = "default_max_containers")]
    pub max_containers: usize,

    /// Timeout applied to operations that do not set their own.
    ///
    /// None disables the default timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: Option<u64>,

    /// Idle threshold for the reaper. None disables idle eviction.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: Option<u64>,

    /// Fixed sweep interval. When unset, derived from the idle threshold.
    #[serde(default)]
    pub reap_interval_ms: Option<u64>,

    /// Prefix for the default counter identifier generator.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Buffered events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_working_dir")]
    pub default_working_dir: String,

    /// Environment every container starts with; spawn options add to it.
    #[serde(default)]
    pub default_env: HashMap<String, String>,

    #[serde(default)]
    pub default_runtime: RuntimePreference,

    /// When set, logs go to a daily-rotated file in this directory.
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<PathBuf>,
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

fn default_max_containers() -> usize {
    env_parse(envs::SANDPIT_MAX_CONTAINERS).unwrap_or(defaults::MAX_CONTAINERS)
}

fn default_timeout_ms() -> Option<u64> {
    Some(env_parse(envs::SANDPIT_DEFAULT_TIMEOUT_MS).unwrap_or(defaults::OPERATION_TIMEOUT_MS))
}

fn default_idle_timeout_ms() -> Option<u64> {
    Some(env_parse(envs::SANDPIT_IDLE_TIMEOUT_MS).unwrap_or(defaults::IDLE_TIMEOUT_MS))
}

fn default_id_prefix() -> String {
    defaults::ID_PREFIX.to_string()
}

fn default_event_capacity() -> usize {
    defaults::EVENT_CAPACITY
}

fn default_working_dir() -> String {
    defaults::WORKING_DIR.to_string()
}

fn default_log_dir() -> Option<PathBuf> {
    std::env::var(envs::SANDPIT_LOG_DIR).ok().map(PathBuf::from)
}

impl Default for SandpitOptions {
    fn default() -> Self {
        Self {
            max_containers: default_max_containers(),
            default_timeout_ms: default_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            reap_interval_ms: None,
            id_prefix: default_id_prefix(),
            event_capacity: default_event_capacity(),
            default_working_dir: default_working_dir(),
            default_env: HashMap::new(),
            default_runtime: RuntimePreference::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl SandpitOptions {
    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> SandpitResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| SandpitError::Config(format!("invalid options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> SandpitResult<()> {
        if self.max_containers == 0 {
            return Err(SandpitError::Config("max_containers must be at least 1".into()));
        }
        if self.default_timeout_ms == Some(0) {
            return Err(SandpitError::Config("default_timeout_ms must be positive".into()));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(SandpitError::Config("idle_timeout_ms must be positive".into()));
        }
        if self.reap_interval_ms == Some(0) {
            return Err(SandpitError::Config("reap_interval_ms must be positive".into()));
        }
        if !self.default_working_dir.starts_with('/') {
            return Err(SandpitError::Config(format!(
                "default_working_dir must be absolute, got: {}",
                self.default_working_dir
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Sweep interval: the explicit override, or half the idle threshold
    /// clamped to the reaper bounds. None when idle eviction is off.
    pub fn reap_interval(&self) -> Option<Duration> {
        let idle = self.idle_timeout()?;
        if let Some(ms) = self.reap_interval_ms {
            return Some(Duration::from_millis(ms));
        }
        Some((idle / reaper::IDLE_DIVISOR).clamp(reaper::MIN_INTERVAL, reaper::MAX_INTERVAL))
    }

    pub fn with_max_containers(mut self, max: usize) -> Self {
        self.max_containers = max;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout_ms = idle.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn with_default_runtime(mut self, preference: RuntimePreference) -> Self {
        self.default_runtime = preference;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

// ============================================================================
// Spawn / Clone Options
// ============================================================================

/// Options used when spawning a container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpawnOptions {
    /// Caller-chosen identifier. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Initial filesystem content. Empty when absent.
    #[serde(default)]
    pub snapshot: Option<FsSnapshot>,

    /// Files written after the snapshot is loaded, relative to the working
    /// directory unless absolute.
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Added on top of the runtime's default environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Overrides the runtime's default preference.
    #[serde(default)]
    pub runtime: Option<RuntimePreference>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: FsSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_runtime(mut self, preference: RuntimePreference) -> Self {
        self.runtime = Some(preference);
        self
    }
}

/// Options for cloning a container.
///
/// Working directory, environment, metadata and runtime preference are
/// inherited from the source; a field set here replaces the inherited value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloneOptions {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub runtime: Option<RuntimePreference>,
}

impl CloneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Per-call options for execute, run_file and install.
#[derive(Clone, Debug, Default)]
pub struct OperationOptions {
    /// Overrides the runtime's default timeout.
    pub timeout: Option<Duration>,
    /// Cancelling the token aborts the operation, queued or running.
    pub cancel: Option<CancellationToken>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SandpitOptions {
        SandpitOptions {
            max_containers: 4,
            default_timeout_ms: Some(1_000),
            idle_timeout_ms: Some(10_000),
            reap_interval_ms: None,
            id_prefix: "c".into(),
            event_capacity: 16,
            default_working_dir: "/workspace".into(),
            default_env: HashMap::new(),
            default_runtime: RuntimePreference::Auto,
            log_dir: None,
        }
    }

    #[test]
    fn test_reap_interval_is_half_idle_clamped() {
        assert_eq!(base().reap_interval(), Some(Duration::from_secs(5)));

        let short = base().with_idle_timeout(Some(Duration::from_millis(500)));
        assert_eq!(short.reap_interval(), Some(reaper::MIN_INTERVAL));

        let long = base().with_idle_timeout(Some(Duration::from_secs(3600)));
        assert_eq!(long.reap_interval(), Some(reaper::MAX_INTERVAL));
    }

    #[test]
    fn test_reap_interval_override_and_disable() {
        let fixed = base().with_reap_interval(Duration::from_millis(20));
        assert_eq!(fixed.reap_interval(), Some(Duration::from_millis(20)));

        let off = base().with_idle_timeout(None);
        assert_eq!(off.reap_interval(), None);
    }

    #[test]
    fn test_validate() {
        assert!(base().validate().is_ok());
        assert!(base().with_max_containers(0).validate().is_err());

        let mut zero_timeout = base();
        zero_timeout.default_timeout_ms = Some(0);
        assert!(zero_timeout.validate().is_err());

        let mut relative = base();
        relative.default_working_dir = "workspace".into();
        assert!(relative.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = SandpitOptions::from_json(
            r#"{"max_containers": 3, "idle_timeout_ms": null, "default_runtime": "inline"}"#,
        )
        .unwrap();
        assert_eq!(options.max_containers, 3);
        assert_eq!(options.idle_timeout_ms, None);
        assert_eq!(options.default_runtime, RuntimePreference::Inline);
        assert_eq!(options.id_prefix, defaults::ID_PREFIX);
        assert_eq!(options.event_capacity, defaults::EVENT_CAPACITY);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(SandpitOptions::from_json(r#"{"max_containers": 0}"#).is_err());
        assert!(SandpitOptions::from_json("not json").is_err());
    }

    #[test]
    fn test_spawn_options_builder() {
        let options = SpawnOptions::new()
            .with_id("a")
            .with_file("index.js", "module.exports = 1;")
            .with_env("NODE_ENV", "test")
            .with_metadata("owner", serde_json::json!("alice"))
            .with_runtime(RuntimePreference::Inline);

        assert_eq!(options.id.as_deref(), Some("a"));
        assert_eq!(options.files.len(), 1);
        assert_eq!(options.env["NODE_ENV"], "test");
        assert_eq!(options.runtime, Some(RuntimePreference::Inline));
    }
}
