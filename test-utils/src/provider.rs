use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sandpit::fs::{SharedFs, resolve_path};
use sandpit::{ExecutionResult, RuntimeHandle, RuntimeMode, RuntimeOptions, RuntimeProvider};
use sandpit_shared::errors::{SandpitError, SandpitResult};

use crate::probe::ExecProbe;
use crate::script::{Scope, Script};

/// Inline provider running [`Script`]s against the container filesystem.
///
/// Failure switches can be flipped at any time and apply to the next
/// `create`/`terminate`.
#[derive(Debug, Default)]
pub struct ScriptProvider {
    probe: ExecProbe,
    fail_create: AtomicBool,
    fail_terminate: Arc<AtomicBool>,
    hang_terminate: Arc<AtomicBool>,
    create_delay_ms: AtomicU64,
    created: AtomicUsize,
    terminated: Arc<AtomicUsize>,
}

impl ScriptProvider {
    pub fn new(probe: ExecProbe) -> Self {
        Self {
            probe,
            ..Self::default()
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }

    /// Make every later release never complete.
    pub fn set_hang_terminate(&self, hang: bool) {
        self.hang_terminate.store(hang, Ordering::SeqCst);
    }

    /// Delay every construction by `delay` on the tokio clock.
    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Runtimes constructed so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Runtimes released so far.
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn probe(&self) -> &ExecProbe {
        &self.probe
    }
}

#[async_trait]
impl RuntimeProvider for ScriptProvider {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Inline
    }

    async fn create(
        &self,
        fs: SharedFs,
        options: &RuntimeOptions,
    ) -> SandpitResult<Arc<dyn RuntimeHandle>> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SandpitError::Engine("script runtime failed to start".into()));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptHandle {
            fs,
            working_dir: options.working_dir.clone(),
            env: options.env.clone(),
            probe: self.probe.clone(),
            fail_terminate: Arc::clone(&self.fail_terminate),
            hang_terminate: Arc::clone(&self.hang_terminate),
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

struct ScriptHandle {
    fs: SharedFs,
    working_dir: String,
    env: HashMap<String, String>,
    probe: ExecProbe,
    fail_terminate: Arc<AtomicBool>,
    hang_terminate: Arc<AtomicBool>,
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl RuntimeHandle for ScriptHandle {
    async fn execute(&self, code: &str, _filename: Option<&str>) -> SandpitResult<ExecutionResult> {
        let _running = self.probe.enter();
        let script = Script::parse(code)?;
        let scope = Scope {
            fs: &self.fs,
            working_dir: &self.working_dir,
            env: &self.env,
            probe: &self.probe,
        };
        script.run(&scope).await
    }

    async fn run_file(&self, filename: &str) -> SandpitResult<ExecutionResult> {
        let path = resolve_path(&self.working_dir, filename)?;
        let code = self.fs.read_to_string(&path)?;
        self.execute(&code, Some(&path)).await
    }

    async fn terminate(&self) -> SandpitResult<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        if self.hang_terminate.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(SandpitError::Engine("script runtime failed to stop".into()));
        }
        Ok(())
    }
}
