/// Compose descriptor handling: required-service resolution and the
/// fragment merge
///
/// A deployment descriptor is one YAML mapping with four top-level sections
/// (services, volumes, secrets, networks). Fragments are overlaid in scan
/// order: map values merge key-by-key, scalar values are replaced by the
/// later fragment, sequences are replaced wholesale.

use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::StackError;
use crate::utils::constants::{
    MERGE_SECTIONS, REQUIRED_SERVICES_KEY, TEMPLATE_REF_KEY, TEMPLATE_REPO_KEY,
};

/// Template source pinned by the project descriptor.
#[derive(Debug, Clone, Default)]
pub struct TemplateSource {
    pub repo: Option<String>,
    pub git_ref: Option<String>,
}

/// Load a YAML document, treating an absent file as an empty mapping.
pub fn load_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Mapping(Mapping::new()));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        other => Ok(other),
    }
}

/// Read the declared required-service list from the project descriptor.
pub fn required_services(descriptor_path: &Path) -> Result<Vec<String>> {
    if !descriptor_path.exists() {
        return Err(StackError::Config(format!(
            "project descriptor {} is missing",
            descriptor_path.display()
        ))
        .into());
    }

    let doc = load_document(descriptor_path)?;

    let declared = doc
        .get(REQUIRED_SERVICES_KEY)
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if declared.is_empty() {
        return Err(StackError::Config(format!(
            "{} declares no required services ({} list is absent or empty)",
            descriptor_path.display(),
            REQUIRED_SERVICES_KEY
        ))
        .into());
    }

    Ok(declared)
}

/// Read the template repository/ref pins, if any.
pub fn template_source(descriptor_path: &Path) -> Result<TemplateSource> {
    let doc = load_document(descriptor_path)?;

    Ok(TemplateSource {
        repo: doc
            .get(TEMPLATE_REPO_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        git_ref: doc
            .get(TEMPLATE_REF_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

/// Remove the reserved declaration keys so they never leak into the merged
/// output.
pub fn strip_reserved_keys(doc: &mut Value) {
    if let Value::Mapping(map) = doc {
        for key in [REQUIRED_SERVICES_KEY, TEMPLATE_REPO_KEY, TEMPLATE_REF_KEY] {
            map.remove(key);
        }
    }
}

/// Recursive map overlay: `overlay` wins for scalars and sequences, maps
/// merge key-by-key.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// Merge the project base descriptor with the per-service fragments, in
/// fragment scan order. Reserved keys are stripped from every input.
pub fn merge_descriptor(base: Value, fragments: Vec<Value>) -> Value {
    let mut merged = base;
    strip_reserved_keys(&mut merged);

    for mut fragment in fragments {
        strip_reserved_keys(&mut fragment);
        deep_merge(&mut merged, fragment);
    }

    normalize_section_order(merged)
}

/// Emit the four compose sections first and in a fixed order, so repeated
/// assemblies serialize identically.
fn normalize_section_order(doc: Value) -> Value {
    let Value::Mapping(map) = doc else {
        return doc;
    };

    let mut ordered = Mapping::new();

    let mut map = map;
    for section in MERGE_SECTIONS {
        if let Some(value) = map.remove(*section) {
            ordered.insert(Value::String(section.to_string()), value);
        }
    }
    for (key, value) in map {
        ordered.insert(key, value);
    }

    Value::Mapping(ordered)
}

/// Service names defined in a descriptor, for display and validation.
pub fn service_names(doc: &Value) -> Vec<String> {
    doc.get("services")
        .and_then(|s| s.as_mapping())
        .map(|m| {
            m.keys()
                .filter_map(|k| k.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

pub fn to_yaml_string(doc: &Value) -> Result<String> {
    serde_yaml::to_string(doc).context("Failed to serialize merged descriptor")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_is_union_with_overlay() {
        let base = yaml(
            "services:\n  redis:\n    image: redis:7\n    ports: [6379]\nvolumes:\n  redis_data: {}\n",
        );
        let fragment = yaml(
            "services:\n  redis:\n    image: redis:7.2\n  mariadb:\n    image: mariadb:11\nnetworks:\n  backend: {}\n",
        );

        let merged = merge_descriptor(base, vec![fragment]);

        let services = merged.get("services").unwrap().as_mapping().unwrap();
        assert_eq!(services.len(), 2);
        // later fragment wins for scalars, key-by-key for maps
        assert_eq!(
            merged["services"]["redis"]["image"].as_str().unwrap(),
            "redis:7.2"
        );
        assert_eq!(merged["services"]["redis"]["ports"][0].as_u64().unwrap(), 6379);
        assert!(merged.get("networks").is_some());
        assert!(merged.get("volumes").is_some());
    }

    #[test]
    fn test_sequences_replaced_wholesale() {
        let base = yaml("services:\n  app:\n    ports: [80, 443]\n");
        let fragment = yaml("services:\n  app:\n    ports: [8080]\n");

        let merged = merge_descriptor(base, vec![fragment]);

        let ports = merged["services"]["app"]["ports"].as_sequence().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].as_u64().unwrap(), 8080);
    }

    #[test]
    fn test_reserved_keys_do_not_leak() {
        let base = yaml("x-required-services: [redis]\nservices:\n  redis:\n    image: redis:7\n");
        let fragment = yaml("x-required-services: [mariadb]\nservices: {}\n");

        let merged = merge_descriptor(base, vec![fragment]);

        assert!(merged.get(REQUIRED_SERVICES_KEY).is_none());
    }

    #[test]
    fn test_absent_fragment_is_empty_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yml");

        let doc = load_document(&missing).unwrap();
        assert!(matches!(doc, Value::Mapping(ref m) if m.is_empty()));
    }

    #[test]
    fn test_required_services_missing_list_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, "services: {}\n").unwrap();

        let err = required_services(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::Config(_))
        ));
    }

    #[test]
    fn test_required_services_parsed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, "x-required-services:\n  - redis\n  - postgresql\n").unwrap();

        let services = required_services(&path).unwrap();
        assert_eq!(services, vec!["redis", "postgresql"]);
    }

    #[test]
    fn test_merge_serialization_is_stable() {
        let base = yaml("services:\n  a:\n    image: x\nnetworks:\n  n: {}\n");
        let fragment = yaml("volumes:\n  v: {}\n");

        let first = to_yaml_string(&merge_descriptor(base.clone(), vec![fragment.clone()])).unwrap();
        let second = to_yaml_string(&merge_descriptor(base, vec![fragment])).unwrap();
        assert_eq!(first, second);
    }
}
