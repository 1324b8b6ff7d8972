//! Package installation scoped to a container working directory.
//!
//! [`PackageInstaller`] is the seam a real package subsystem plugs into.
//! [`ManifestInstaller`] is the reference implementation: it records
//! dependencies in the manifest and materializes a package stub under the
//! modules directory, all inside the container filesystem.

use std::sync::Arc;

use async_trait::async_trait;
use sandpit_shared::constants::files;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::fs::{SharedFs, resolve_path};

/// Options for a single install call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    /// Record under `devDependencies` instead of `dependencies`.
    #[serde(default)]
    pub dev: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub installed: Vec<InstalledPackage>,
    /// Absolute path of the manifest that was updated.
    pub manifest: String,
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install one or more whitespace-separated package specs.
    async fn install(&self, spec: &str, options: &InstallOptions) -> SandpitResult<InstallResult>;
}

/// Builds an installer bound to a container filesystem and working directory.
pub trait InstallerFactory: Send + Sync {
    fn create(&self, fs: SharedFs, working_dir: &str) -> SandpitResult<Arc<dyn PackageInstaller>>;
}

/// A parsed `name[@version]` spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
}

impl PackageSpec {
    pub fn parse(spec: &str) -> SandpitResult<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(SandpitError::Install("empty package spec".into()));
        }

        // Scoped names carry a leading '@' that is not a version separator.
        let search_from = usize::from(spec.starts_with('@'));
        let (name, version) = match spec[search_from..].find('@') {
            Some(idx) => {
                let at = idx + search_from;
                (&spec[..at], &spec[at + 1..])
            }
            None => (spec, ""),
        };

        validate_name(name, spec)?;

        Ok(Self {
            name: name.to_string(),
            version: if version.is_empty() {
                "latest".to_string()
            } else {
                version.to_string()
            },
        })
    }
}

fn validate_name(name: &str, spec: &str) -> SandpitResult<()> {
    let bad = |reason: &str| SandpitError::Install(format!("invalid package spec '{}': {}", spec, reason));

    if name.is_empty() || name == "@" {
        return Err(bad("missing name"));
    }
    if name.starts_with('.') || name.starts_with('_') {
        return Err(bad("name cannot start with '.' or '_'"));
    }
    if name.starts_with('@') && name.matches('/').count() != 1 {
        return Err(bad("scoped names need exactly one '/'"));
    }
    if !name.starts_with('@') && name.contains('/') {
        return Err(bad("unscoped names cannot contain '/'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@'))
    {
        return Err(bad("unsupported character"));
    }
    Ok(())
}

/// Installer that writes manifests and package stubs into the filesystem.
pub struct ManifestInstaller {
    fs: SharedFs,
    working_dir: String,
}

impl ManifestInstaller {
    pub fn new(fs: SharedFs, working_dir: impl Into<String>) -> Self {
        Self {
            fs,
            working_dir: working_dir.into(),
        }
    }

    fn load_manifest(&self, path: &str) -> SandpitResult<Map<String, Value>> {
        if !self.fs.exists(path) {
            return Ok(Map::new());
        }
        let raw = self.fs.read_to_string(path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(SandpitError::Install(format!("{} is not a JSON object", path))),
            Err(e) => Err(SandpitError::Install(format!("failed to parse {}: {}", path, e))),
        }
    }
}

#[async_trait]
impl PackageInstaller for ManifestInstaller {
    async fn install(&self, spec: &str, options: &InstallOptions) -> SandpitResult<InstallResult> {
        let packages = spec
            .split_whitespace()
            .map(PackageSpec::parse)
            .collect::<SandpitResult<Vec<_>>>()?;
        if packages.is_empty() {
            return Err(SandpitError::Install("no packages given".into()));
        }

        let manifest_path = resolve_path(&self.working_dir, files::MANIFEST)?;
        let mut manifest = self.load_manifest(&manifest_path)?;
        let section = if options.dev {
            "devDependencies"
        } else {
            "dependencies"
        };

        let deps = manifest
            .entry(section)
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(deps) = deps else {
            return Err(SandpitError::Install(format!(
                "'{}' in {} is not an object",
                section, manifest_path
            )));
        };

        for package in &packages {
            deps.insert(package.name.clone(), Value::String(package.version.clone()));

            let stub = resolve_path(
                &self.working_dir,
                &format!("{}/{}/{}", files::MODULES_DIR, package.name, files::MANIFEST),
            )?;
            let body = json!({ "name": package.name, "version": package.version });
            self.fs.write_file(&stub, body.to_string())?;
        }

        let rendered = serde_json::to_string_pretty(&Value::Object(manifest))
            .map_err(|e| SandpitError::Install(format!("failed to encode manifest: {}", e)))?;
        self.fs.write_file(&manifest_path, rendered)?;

        tracing::debug!(
            manifest = %manifest_path,
            count = packages.len(),
            dev = options.dev,
            "Recorded packages"
        );

        Ok(InstallResult {
            installed: packages
                .into_iter()
                .map(|p| InstalledPackage {
                    name: p.name,
                    version: p.version,
                })
                .collect(),
            manifest: manifest_path,
        })
    }
}

/// Factory for [`ManifestInstaller`]; the orchestrator's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestInstallerFactory;

impl InstallerFactory for ManifestInstallerFactory {
    fn create(&self, fs: SharedFs, working_dir: &str) -> SandpitResult<Arc<dyn PackageInstaller>> {
        Ok(Arc::new(ManifestInstaller::new(fs, working_dir)))
    }
}
