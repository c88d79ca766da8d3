//! Config-file editor (C6): parse, apply dotted-path updates, write back,
//! backup. Operates over a YAML HelmRelease document. Shared verbatim by
//! the GitOps orchestrator (C5) and the rollback producer (C9) — neither
//! reimplements any part of this.

use guard_types::{FieldUpdate, UpgradeSpec};
use serde_yaml::Value;

use crate::error::ConfigUpdaterError;

const VERSION_PATH: &str = "spec.chart.spec.version";

pub fn supports_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if !(lower.ends_with(".yaml") || lower.ends_with(".yml")) {
        return false;
    }
    match parse(&std::fs::read_to_string(path).unwrap_or_default()) {
        Ok(doc) => doc.get("kind").and_then(Value::as_str) == Some("HelmRelease"),
        Err(_) => false,
    }
}

pub fn validate_config(path: &str) -> Result<(bool, Vec<String>), ConfigUpdaterError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigUpdaterError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let doc = parse(&contents)?;
    let mut errors = Vec::new();

    if doc.get("apiVersion").is_none() {
        errors.push("missing required key 'apiVersion'".to_string());
    }
    match doc.get("kind").and_then(Value::as_str) {
        Some("HelmRelease") => {}
        Some(other) => errors.push(format!("expected kind 'HelmRelease', found '{other}'")),
        None => errors.push("missing required key 'kind'".to_string()),
    }
    if get_path(&doc, VERSION_PATH).is_none() {
        errors.push(format!("missing required path '{VERSION_PATH}'"));
    }

    Ok((errors.is_empty(), errors))
}

pub fn get_current_version(path: &str) -> Result<String, ConfigUpdaterError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigUpdaterError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let doc = parse(&contents)?;
    get_path(&doc, VERSION_PATH)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigUpdaterError::MissingStructuralKey {
            path: path.to_string(),
            key: VERSION_PATH.to_string(),
        })
}

/// Legacy single-field update, preserved alongside `apply_upgrade_spec`
/// for the rollback producer's (C9) simpler call shape.
pub fn update_version(path: &str, target_version: &str, backup: bool) -> Result<(), ConfigUpdaterError> {
    let spec = UpgradeSpec::new(
        strip_v_prefix(target_version),
        vec![FieldUpdate::new(VERSION_PATH, clean_version_value(target_version))
            .expect("version path is a valid constant")],
    );
    apply_upgrade_spec(path, &spec, backup)
}

/// The central operation: either every update in `spec` is applied, or
/// the file is left exactly as read (§4.6 contract, §8 invariant).
pub fn apply_upgrade_spec(path: &str, spec: &UpgradeSpec, backup: bool) -> Result<(), ConfigUpdaterError> {
    let original = std::fs::read_to_string(path).map_err(|e| ConfigUpdaterError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let original_doc = parse(&original)?;

    if backup {
        std::fs::write(format!("{path}.bak"), &original)
            .map_err(|e| ConfigUpdaterError::BackupIo {
                path: path.to_string(),
                message: e.to_string(),
            })?;
    }

    // Deep copy before mutation — partial failure must leave the original
    // document (and therefore the file) untouched.
    let mut working_doc = original_doc.clone();
    for update in &spec.updates {
        apply_field_update(&mut working_doc, update, path)?;
    }

    let serialized = serde_yaml::to_string(&working_doc).map_err(|e| ConfigUpdaterError::InvalidYaml {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(path, serialized).map_err(|e| ConfigUpdaterError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

fn apply_field_update(doc: &mut Value, update: &FieldUpdate, file: &str) -> Result<(), ConfigUpdaterError> {
    let segments: Vec<&str> = update.path().split('.').collect();
    let mut cursor = doc;

    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_mapping() {
            return Err(ConfigUpdaterError::NonMappingSegment {
                file: file.to_string(),
                path: update.path().to_string(),
                segment: segment.to_string(),
            });
        }
        let mapping = cursor.as_mapping_mut().expect("checked is_mapping above");
        let key = Value::String(segment.to_string());
        if !mapping.contains_key(&key) {
            if update.create_missing {
                mapping.insert(key.clone(), Value::Mapping(Default::default()));
            } else {
                return Err(ConfigUpdaterError::MissingIntermediateKey {
                    file: file.to_string(),
                    path: update.path().to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        cursor = mapping.get_mut(&key).expect("just inserted or verified present");
    }

    let last = *segments.last().expect("dotted path has at least one segment");
    if !cursor.is_mapping() {
        return Err(ConfigUpdaterError::NonMappingSegment {
            file: file.to_string(),
            path: update.path().to_string(),
            segment: last.to_string(),
        });
    }
    let mapping = cursor.as_mapping_mut().expect("checked is_mapping above");

    let mut value = json_to_yaml(&update.value);
    if update.path() == VERSION_PATH {
        if let Value::String(s) = &value {
            value = Value::String(strip_v_prefix(s));
        }
    }
    mapping.insert(Value::String(last.to_string()), value);
    Ok(())
}

fn parse(contents: &str) -> Result<Value, ConfigUpdaterError> {
    if contents.trim().is_empty() {
        return Err(ConfigUpdaterError::InvalidYaml {
            path: String::new(),
            message: "document is empty".to_string(),
        });
    }
    serde_yaml::from_str(contents).map_err(|e| ConfigUpdaterError::InvalidYaml {
        path: String::new(),
        message: e.to_string(),
    })
}

fn get_path<'a>(doc: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut cursor = doc;
    for segment in dotted_path.split('.') {
        cursor = cursor.as_mapping()?.get(Value::String(segment.to_string()))?;
    }
    Some(cursor)
}

pub fn strip_v_prefix(version: &str) -> String {
    version.strip_prefix('v').unwrap_or(version).to_string()
}

fn clean_version_value(version: &str) -> serde_json::Value {
    serde_json::Value::String(strip_v_prefix(version))
}

fn json_to_yaml(value: &serde_json::Value) -> Value {
    serde_yaml::to_value(value).expect("serde_json::Value always converts to serde_yaml::Value")
}
