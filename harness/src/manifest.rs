//! Project manifest (`polytest.yaml`) loading.
//!
//! ```yaml
//! services:
//!   api:
//!     language: python
//!     project: ./services/api
//!     test:
//!       framework: pytest
//!       unit:
//!         markers: [unit]
//!   web:
//!     language: typescript
//!     project: ./web
//! ```

use model::{ServiceInfo, ServiceTestConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_FILE_NAMES: &[&str] = &["polytest.yaml", "polytest.yml"];

#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The manifest is not valid YAML or has the wrong shape
    #[error("failed to parse manifest: {reason}")]
    Parse { reason: String },

    /// Configuration could not be rendered back to YAML
    #[error("failed to serialize manifest: {reason}")]
    Serialize { reason: String },

    #[error("no services defined")]
    NoServices,

    /// A service `project` resolves outside the manifest directory
    #[error("service {service} project path '{project}' escapes project boundary")]
    EscapesProjectBoundary { service: String, project: String },

    #[error("no {} found in {} or any parent directory", MANIFEST_FILE_NAMES[0], .start.display())]
    NotFound { start: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    services: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct RawService {
    language: String,
    project: String,
    #[serde(default)]
    test: Option<ServiceTestConfig>,
}

/// A loaded manifest: its location and the services it declares, in file order.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub root: PathBuf,
    pub services: Vec<ServiceInfo>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> ManifestResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.canonicalize()?,
            _ => std::env::current_dir()?,
        };
        let services = parse_services(&content, &root)?;
        debug!(path = %path.display(), services = services.len(), "loaded manifest");

        Ok(Self {
            path: path.to_path_buf(),
            root,
            services,
        })
    }

    /// Find the nearest manifest at or above `start` and load it.
    pub fn discover(start: &Path) -> ManifestResult<Self> {
        let path = find_manifest(start).ok_or_else(|| ManifestError::NotFound {
            start: start.to_path_buf(),
        })?;
        Self::load(path)
    }
}

/// Parse the services of a manifest whose directory is `root`.
///
/// Project paths are resolved against `root`; any path leaving it rejects the
/// whole manifest.
pub fn parse_services(content: &str, root: &Path) -> ManifestResult<Vec<ServiceInfo>> {
    let raw: RawManifest = serde_yaml::from_str(content).map_err(|e| ManifestError::Parse {
        reason: e.to_string(),
    })?;
    if raw.services.is_empty() {
        return Err(ManifestError::NoServices);
    }

    let root = normalize(root);
    let mut services = Vec::with_capacity(raw.services.len());
    for (key, value) in raw.services {
        let name = key
            .as_str()
            .ok_or_else(|| ManifestError::Parse {
                reason: format!("service name must be a string, got {key:?}"),
            })?
            .to_string();
        let service: RawService =
            serde_yaml::from_value(value).map_err(|e| ManifestError::Parse {
                reason: format!("service {name}: {e}"),
            })?;

        let dir = normalize(&root.join(&service.project));
        if !dir.starts_with(&root) {
            return Err(ManifestError::EscapesProjectBoundary {
                service: name,
                project: service.project,
            });
        }

        let mut info = ServiceInfo::new(name, service.language, dir);
        if let Some(config) = service.test {
            info = info.with_config(config);
        }
        services.push(info);
    }
    Ok(services)
}

/// Walk up from `start` looking for a manifest file.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        MANIFEST_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Resolve `.` and `..` lexically, without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
