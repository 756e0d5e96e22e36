//! YAML configuration loading, merging and environment substitution.
//!
//! Multiple config files merge in order (later files win, deep-merged).
//! String scalars may embed `${VAR}` or `${VAR, default}` environment
//! references, resolved after merging and before validation.

// Layer 1: Standard library imports
use std::path::Path;

// Layer 2: Third-party crate imports
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid yaml: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file {path} must contain a mapping at the top level")]
    NotAMapping { path: String },

    #[error("environment variable {0} is not set and has no default")]
    MissingEnvVar(String),
}

/// Deep-merge `overlay` onto `base`: objects merge key-wise, everything
/// else is replaced by the overlay value.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged_value = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn substitute_scalar(text: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let reference = &after[..end];
        let (name, default) = match reference.split_once(',') {
            Some((name, default)) => (name.trim(), Some(default.trim())),
            None => (reference.trim(), None),
        };
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => match default {
                Some(default) => out.push_str(default),
                None => return Err(ConfigError::MissingEnvVar(name.to_string())),
            },
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve `${VAR}` references in every string scalar, in place.
pub fn resolve_config_values(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(text) => {
            if text.contains("${") {
                *text = substitute_scalar(text)?;
            }
            Ok(())
        }
        Value::Array(list) => {
            for entry in list {
                resolve_config_values(entry)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for entry in map.values_mut() {
                resolve_config_values(entry)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn load_one(path: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
    let json = serde_json::to_value(yaml).map_err(|_| ConfigError::NotAMapping {
        path: path.display().to_string(),
    })?;
    if !json.is_object() {
        return Err(ConfigError::NotAMapping {
            path: path.display().to_string(),
        });
    }
    Ok(json)
}

/// Load and merge one or more YAML config files, then resolve
/// environment substitutions.
pub fn load_config_files<P: AsRef<Path>>(paths: &[P]) -> Result<Value, ConfigError> {
    let mut merged = Value::Object(Map::new());
    for path in paths {
        let document = load_one(path.as_ref())?;
        merged = deep_merge(&merged, &document);
    }
    resolve_config_values(&mut merged)?;
    Ok(merged)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use std::io::Write;

    use super::*;

    #[test]
    fn deep_merge_prefers_overlay_and_merges_objects() {
        let base = json!({"a": {"x": 1, "y": 2}, "keep": true});
        let overlay = json!({"a": {"y": 3, "z": 4}, "new": "v"});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(
            merged,
            json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true, "new": "v"})
        );
    }

    #[test]
    fn env_substitution_with_defaults() {
        std::env::set_var("FLUXMESH_TEST_VAR", "hello");
        let mut value = json!({
            "present": "${FLUXMESH_TEST_VAR}",
            "defaulted": "${FLUXMESH_TEST_MISSING, fallback}",
            "embedded": "prefix-${FLUXMESH_TEST_VAR}-suffix",
        });
        resolve_config_values(&mut value).unwrap();
        assert_eq!(value["present"], json!("hello"));
        assert_eq!(value["defaulted"], json!("fallback"));
        assert_eq!(value["embedded"], json!("prefix-hello-suffix"));
    }

    #[test]
    fn missing_env_var_without_default_fails() {
        let mut value = json!({"broken": "${FLUXMESH_TEST_DEFINITELY_MISSING}"});
        assert!(matches!(
            resolve_config_values(&mut value),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn loads_and_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("base.yaml");
        let second = dir.path().join("override.yaml");
        writeln!(
            std::fs::File::create(&first).unwrap(),
            "instance_name: base\nlog:\n  level: info"
        )
        .unwrap();
        writeln!(
            std::fs::File::create(&second).unwrap(),
            "log:\n  level: debug"
        )
        .unwrap();

        let merged = load_config_files(&[&first, &second]).unwrap();
        assert_eq!(merged["instance_name"], json!("base"));
        assert_eq!(merged["log"]["level"], json!("debug"));
    }

    #[test]
    fn scalar_top_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "just a string").unwrap();
        assert!(matches!(
            load_config_files(&[&path]),
            Err(ConfigError::NotAMapping { .. })
        ));
    }
}
