use std::collections::HashMap;
use std::sync::Arc;

use sandpit::{
    ContainerInfo, ManualClock, RuntimeBuilder, RuntimePreference, RuntimeProvider,
    SandpitOptions, SandpitRuntime, SpawnOptions,
};

use crate::probe::ExecProbe;
use crate::provider::ScriptProvider;

/// Options isolated from `SANDPIT_*` environment overrides.
///
/// Idle eviction is off; tests that need it turn it on explicitly.
pub fn test_options() -> SandpitOptions {
    SandpitOptions {
        max_containers: 8,
        default_timeout_ms: Some(5_000),
        idle_timeout_ms: None,
        reap_interval_ms: None,
        id_prefix: "test".into(),
        event_capacity: 1024,
        default_working_dir: "/workspace".into(),
        default_env: HashMap::new(),
        default_runtime: RuntimePreference::Auto,
        log_dir: None,
    }
}

/// Runtime backed by a [`ScriptProvider`] and a [`ManualClock`].
pub struct TestContext {
    pub runtime: SandpitRuntime,
    pub provider: Arc<ScriptProvider>,
    pub probe: ExecProbe,
    pub clock: ManualClock,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: SandpitOptions) -> Self {
        Self::with_builder(options, |builder, provider| builder.provider(provider))
    }

    /// Register the script provider through `configure`, e.g. to host it on
    /// worker tasks.
    pub fn with_builder(
        options: SandpitOptions,
        configure: impl FnOnce(RuntimeBuilder, Arc<dyn RuntimeProvider>) -> RuntimeBuilder,
    ) -> Self {
        let probe = ExecProbe::new();
        let provider = Arc::new(ScriptProvider::new(probe.clone()));
        let clock = ManualClock::new();

        let builder = RuntimeBuilder::new(options).clock(Arc::new(clock.clone()));
        let engine: Arc<dyn RuntimeProvider> = provider.clone();
        let runtime = configure(builder, engine)
            .build()
            .expect("Failed to build runtime");

        Self {
            runtime,
            provider,
            probe,
            clock,
        }
    }

    pub async fn spawn(&self) -> ContainerInfo {
        self.runtime
            .spawn(SpawnOptions::new())
            .await
            .expect("Failed to spawn container")
    }

    pub async fn spawn_with_file(&self, path: &str, contents: &str) -> ContainerInfo {
        self.runtime
            .spawn(SpawnOptions::new().with_file(path, contents))
            .await
            .expect("Failed to spawn container")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
