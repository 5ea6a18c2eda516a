//! Writing detected test configuration back into the manifest.
//!
//! Only services without a `test:` block are touched; declared configuration
//! always stays as written. The manifest is rewritten through `serde_yaml`, so
//! key order is kept but comments are not.

use crate::manifest::{ManifestError, ManifestResult};
use crate::validation::ServiceValidation;
use model::{ServiceInfo, ServiceTestConfig};
use runners::resolve_test_config;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const SERVICES_KEY: &str = "services";
const TEST_KEY: &str = "test";

/// Detected configuration for every testable service the manifest leaves
/// unconfigured, keyed by service name.
pub fn detected_test_configs(
    services: &[ServiceInfo],
    validations: &[ServiceValidation],
) -> BTreeMap<String, ServiceTestConfig> {
    let mut configs = BTreeMap::new();
    for service in services.iter().filter(|s| s.config.is_none()) {
        let testable = validations
            .iter()
            .any(|v| v.name == service.name && v.can_test && !v.framework.is_empty());
        if !testable {
            continue;
        }
        match resolve_test_config(service) {
            Ok(config) => {
                configs.insert(service.name.clone(), config);
            }
            Err(e) => warn!(service = %service.name, error = %e, "failed to detect test configuration"),
        }
    }
    configs
}

/// A `services:` snippet holding the given configurations, or an empty string
/// when there are none.
pub fn generate_test_config_yaml(
    configs: &BTreeMap<String, ServiceTestConfig>,
) -> ManifestResult<String> {
    if configs.is_empty() {
        return Ok(String::new());
    }

    let mut services = Mapping::new();
    for (name, config) in configs {
        let mut service = Mapping::new();
        service.insert(Value::from(TEST_KEY), to_value(config)?);
        services.insert(Value::from(name.as_str()), Value::Mapping(service));
    }
    let mut root = Mapping::new();
    root.insert(Value::from(SERVICES_KEY), Value::Mapping(services));

    serde_yaml::to_string(&root).map_err(|e| ManifestError::Serialize {
        reason: e.to_string(),
    })
}

/// Add a `test:` block to each listed service of the manifest at `path` that
/// does not have one yet. Returns the services that were updated, in file order.
pub fn save_test_configs(
    path: &Path,
    configs: &BTreeMap<String, ServiceTestConfig>,
) -> ManifestResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut root: Value = serde_yaml::from_str(&content).map_err(|e| ManifestError::Parse {
        reason: e.to_string(),
    })?;
    let services = root
        .get_mut(SERVICES_KEY)
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| ManifestError::Parse {
            reason: "services section not found or invalid".to_string(),
        })?;

    let mut saved = Vec::new();
    for (key, service) in services.iter_mut() {
        let Some(name) = key.as_str() else {
            continue;
        };
        let Some(config) = configs.get(name) else {
            continue;
        };
        let Some(service) = service.as_mapping_mut() else {
            continue;
        };
        if service.contains_key(TEST_KEY) {
            debug!(service = %name, "keeping declared test configuration");
            continue;
        }
        service.insert(Value::from(TEST_KEY), to_value(config)?);
        saved.push(name.to_string());
    }

    if saved.is_empty() {
        return Ok(saved);
    }

    let output = serde_yaml::to_string(&root).map_err(|e| ManifestError::Serialize {
        reason: e.to_string(),
    })?;
    fs::write(path, output)?;
    debug!(path = %path.display(), services = saved.len(), "saved detected test configuration");
    Ok(saved)
}

fn to_value(config: &ServiceTestConfig) -> ManifestResult<Value> {
    serde_yaml::to_value(config).map_err(|e| ManifestError::Serialize {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::validation::validate_services;
    use tempfile::TempDir;

    const MANIFEST: &str = "\
name: shop
services:
  api:
    language: go
    project: ./api
  worker:
    language: python
    project: ./worker
    test:
      framework: pytest
      unit:
        markers: [fast]
";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let api = dir.path().join("api");
        fs::create_dir_all(&api).unwrap();
        fs::write(api.join("go.mod"), "module example.com/api\n").unwrap();
        fs::write(api.join("calc_test.go"), "package api\n").unwrap();
        fs::write(dir.path().join("polytest.yaml"), MANIFEST).unwrap();
        dir
    }

    #[test]
    fn test_only_unconfigured_testable_services_are_detected() {
        let dir = project();
        let manifest = Manifest::load(dir.path().join("polytest.yaml")).unwrap();
        let validations = validate_services(&manifest.services);

        let configs = detected_test_configs(&manifest.services, &validations);
        assert_eq!(configs.keys().collect::<Vec<_>>(), vec!["api"]);
        assert_eq!(configs["api"].framework, "gotest");

        let snippet = generate_test_config_yaml(&configs).unwrap();
        assert!(snippet.starts_with("services:\n  api:\n    test:\n"));
        assert!(snippet.contains("framework: gotest"));
        assert_eq!(generate_test_config_yaml(&BTreeMap::new()).unwrap(), "");
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = project();
        let path = dir.path().join("polytest.yaml");
        let manifest = Manifest::load(&path).unwrap();
        let configs = detected_test_configs(&manifest.services, &validate_services(&manifest.services));

        assert_eq!(save_test_configs(&path, &configs).unwrap(), vec!["api"]);

        let reloaded = Manifest::load(&path).unwrap();
        let names: Vec<&str> = reloaded.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api", "worker"]);
        assert_eq!(reloaded.services[0].config.as_ref(), Some(&configs["api"]));
        assert_eq!(reloaded.services[1].config, manifest.services[1].config);
        assert!(fs::read_to_string(&path).unwrap().starts_with("name: shop\n"));

        assert!(save_test_configs(&path, &configs).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_without_services_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("polytest.yaml");
        fs::write(&path, "name: shop\n").unwrap();

        let configs = BTreeMap::from([(
            "api".to_string(),
            ServiceTestConfig::with_framework("gotest"),
        )]);
        assert!(matches!(
            save_test_configs(&path, &configs),
            Err(ManifestError::Parse { .. })
        ));
    }
}
