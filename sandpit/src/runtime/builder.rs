//! Runtime construction with injected collaborators.

use std::sync::Arc;

use sandpit_shared::errors::{SandpitError, SandpitResult};

use crate::clock::{SharedClock, SystemClock};
use crate::engine::{ProviderSet, RuntimeProvider, WorkerProvider};
use crate::installer::{InstallerFactory, ManifestInstallerFactory};
use crate::runtime::core::SandpitRuntime;
use crate::runtime::options::SandpitOptions;
use crate::runtime::reaper;
use crate::runtime::rt_impl::RuntimeImpl;
use crate::runtime::types::{CounterIdGenerator, IdGenerator};
use crate::util::init_logging;

/// Builder for [`SandpitRuntime`].
///
/// At least one runtime provider is required. Everything else has a
/// default: system clock, `prefix-N` identifiers, manifest installer.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use sandpit::{RuntimeBuilder, RuntimeProvider, SandpitOptions};
/// # fn demo(engine: Arc<dyn RuntimeProvider>) -> sandpit::SandpitResult<()> {
/// let runtime = RuntimeBuilder::new(SandpitOptions::default())
///     .worker_provider(Arc::clone(&engine))
///     .provider(engine)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    options: SandpitOptions,
    providers: ProviderSet,
    clock: Option<SharedClock>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    installer_factory: Option<Arc<dyn InstallerFactory>>,
}

impl RuntimeBuilder {
    pub fn new(options: SandpitOptions) -> Self {
        Self {
            options,
            providers: ProviderSet::new(),
            clock: None,
            id_generator: None,
            installer_factory: None,
        }
    }

    /// Register a provider under its own mode.
    pub fn provider(mut self, provider: Arc<dyn RuntimeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register `inner` hosted on worker tasks.
    pub fn worker_provider(self, inner: Arc<dyn RuntimeProvider>) -> Self {
        self.provider(Arc::new(WorkerProvider::new(inner)))
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    pub fn installer_factory(mut self, factory: Arc<dyn InstallerFactory>) -> Self {
        self.installer_factory = Some(factory);
        self
    }

    /// Validate the options and start the runtime.
    ///
    /// The idle reaper is spawned on the current tokio runtime. Outside one,
    /// it stays off and [`SandpitRuntime::reap_idle`] must be called by hand.
    ///
    /// # Errors
    ///
    /// `Config` for invalid options or when no provider is registered;
    /// `Storage` when the log directory cannot be created.
    pub fn build(self) -> SandpitResult<SandpitRuntime> {
        self.options.validate()?;
        if self.providers.is_empty() {
            return Err(SandpitError::Config(
                "at least one runtime provider is required".into(),
            ));
        }

        let log_guard = self
            .options
            .log_dir
            .as_deref()
            .map(init_logging)
            .transpose()?;

        let id_generator = self.id_generator.unwrap_or_else(|| {
            Arc::new(CounterIdGenerator::new(self.options.id_prefix.clone()))
        });
        let reap_interval = self.options.reap_interval();

        let rt = Arc::new(RuntimeImpl::new(
            self.options,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.providers,
            self.installer_factory
                .unwrap_or_else(|| Arc::new(ManifestInstallerFactory)),
            id_generator,
            log_guard,
        ));

        if let Some(interval) = reap_interval {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(reaper::run(
                        Arc::downgrade(&rt),
                        interval,
                        rt.reaper.clone(),
                    ));
                }
                Err(_) => tracing::warn!(
                    "No tokio runtime available, idle reaper disabled"
                ),
            }
        }

        tracing::info!(
            max_containers = rt.options.max_containers,
            providers = ?rt.providers.modes(),
            reap_interval_ms = reap_interval.map(|d| d.as_millis() as u64),
            "Runtime started"
        );
        Ok(SandpitRuntime::from_inner(rt))
    }
}
