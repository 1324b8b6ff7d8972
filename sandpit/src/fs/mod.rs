//! In-memory container filesystem.
//!
//! Each container owns exactly one [`MemFs`]. Sharing state between
//! containers only happens through an [`FsSnapshot`], which is a deep copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde::{Deserialize, Serialize};

/// Shared reference to a container filesystem.
pub type SharedFs = Arc<MemFs>;

/// Point-in-time copy of a filesystem's full content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSnapshot {
    files: BTreeMap<String, Vec<u8>>,
}

impl FsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(path, contents)` pairs.
    pub fn from_files<I, P, C>(files: I) -> SandpitResult<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<Vec<u8>>,
    {
        let mut map = BTreeMap::new();
        for (path, contents) in files {
            map.insert(normalize_path(path.as_ref())?, contents.into());
        }
        Ok(Self { files: map })
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        let path = normalize_path(path).ok()?;
        self.files.get(&path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_json(&self) -> SandpitResult<String> {
        serde_json::to_string(self)
            .map_err(|e| SandpitError::Storage(format!("failed to encode snapshot: {}", e)))
    }

    pub fn from_json(json: &str) -> SandpitResult<Self> {
        let raw: FsSnapshot = serde_json::from_str(json)
            .map_err(|e| SandpitError::Storage(format!("failed to decode snapshot: {}", e)))?;
        // Re-normalize so hand-written snapshots obey the same path rules.
        Self::from_files(raw.files)
    }
}

/// Thread-safe in-memory filesystem.
///
/// Paths are absolute and normalized; directories are implicit.
#[derive(Debug, Default)]
pub struct MemFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filesystem holding a deep copy of `snapshot`.
    pub fn from_snapshot(snapshot: &FsSnapshot) -> Self {
        Self {
            files: RwLock::new(snapshot.files.clone()),
        }
    }

    pub fn write_file(&self, path: &str, contents: impl AsRef<[u8]>) -> SandpitResult<()> {
        let path = normalize_path(path)?;
        tracing::trace!(path = %path, bytes = contents.as_ref().len(), "Writing file");
        self.files.write().insert(path, contents.as_ref().to_vec());
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> SandpitResult<Vec<u8>> {
        let path = normalize_path(path)?;
        self.files
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| SandpitError::Storage(format!("no such file: {}", path)))
    }

    pub fn read_to_string(&self, path: &str) -> SandpitResult<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|e| SandpitError::Storage(format!("{} is not valid UTF-8: {}", path, e)))
    }

    pub fn exists(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(path) => self.files.read().contains_key(&path),
            Err(_) => false,
        }
    }

    pub fn remove_file(&self, path: &str) -> SandpitResult<()> {
        let path = normalize_path(path)?;
        self.files
            .write()
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| SandpitError::Storage(format!("no such file: {}", path)))
    }

    /// List files below `dir`, recursively.
    pub fn list(&self, dir: &str) -> SandpitResult<Vec<String>> {
        let dir = normalize_path(dir)?;
        let prefix = if dir == "/" {
            dir
        } else {
            format!("{}/", dir)
        };
        Ok(self
            .files
            .read()
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    pub fn snapshot(&self) -> FsSnapshot {
        FsSnapshot {
            files: self.files.read().clone(),
        }
    }
}

/// Normalize a path to absolute form, resolving `.` and `..`.
///
/// Relative paths are taken from the root.
pub fn normalize_path(path: &str) -> SandpitResult<String> {
    if path.is_empty() {
        return Err(SandpitError::InvalidArgument("empty path".into()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(SandpitError::InvalidArgument(format!(
                        "path escapes root: {}",
                        path
                    )));
                }
            }
            other => parts.push(other),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Resolve `path` against a working directory.
pub fn resolve_path(cwd: &str, path: &str) -> SandpitResult<String> {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", cwd, path))
    }
}
