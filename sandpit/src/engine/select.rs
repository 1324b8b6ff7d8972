//! Provider selection with fallback.

use std::sync::Arc;

use sandpit_shared::errors::{SandpitError, SandpitResult};

use super::{RuntimeHandle, RuntimeMode, RuntimeOptions, RuntimePreference, RuntimeProvider};
use crate::fs::SharedFs;

/// Ordered collection of providers.
///
/// Worker-isolated providers are tried before inline ones; within a mode,
/// registration order wins.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn RuntimeProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: Arc<dyn RuntimeProvider>) {
        self.providers.push(provider);
        // Stable sort keeps registration order inside each mode.
        self.providers
            .sort_by_key(|p| matches!(p.mode(), RuntimeMode::Inline));
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn modes(&self) -> Vec<RuntimeMode> {
        self.providers.iter().map(|p| p.mode()).collect()
    }

    /// Construct a runtime, trying each acceptable provider in turn.
    ///
    /// Returns the handle and the mode that produced it. When every candidate
    /// fails, the last error is returned.
    pub async fn create(
        &self,
        fs: SharedFs,
        options: &RuntimeOptions,
        preference: RuntimePreference,
    ) -> SandpitResult<(Arc<dyn RuntimeHandle>, RuntimeMode)> {
        let mut last_error = None;

        for provider in self.providers.iter().filter(|p| preference.accepts(p.mode())) {
            let mode = provider.mode();
            match provider.create(Arc::clone(&fs), options).await {
                Ok(handle) => {
                    tracing::debug!(
                        container_id = %options.container_id,
                        mode = %mode,
                        "Runtime constructed"
                    );
                    return Ok((handle, mode));
                }
                Err(e) => {
                    tracing::warn!(
                        container_id = %options.container_id,
                        mode = %mode,
                        error = %e,
                        "Runtime construction failed, trying next provider"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SandpitError::Config(format!(
                "no runtime provider registered for preference {:?} (available: {:?})",
                preference,
                self.modes()
            ))
        }))
    }
}
