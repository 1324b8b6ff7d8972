//! Immutable per-container configuration, fixed at spawn.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{RuntimeOptions, RuntimePreference};
use crate::runtime::types::ContainerID;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: ContainerID,
    /// Absolute, normalized working directory.
    pub working_dir: String,
    pub env: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub runtime: RuntimePreference,
    /// Source container for clones.
    pub parent: Option<ContainerID>,
    pub created_at: DateTime<Utc>,
    /// Registry-wide creation order; `list()` sorts by it.
    pub sequence: u64,
}

impl ContainerConfig {
    /// Options handed to the runtime provider.
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            container_id: self.id.to_string(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        }
    }
}
