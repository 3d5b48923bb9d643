//! Structured config loading and JSON value editing.
//!
//! Deployment configs and pipeline definitions may be written as JSON, YAML or
//! TOML. Everything is normalized to `serde_json::Value` first so `--set`
//! overrides and JSON pointer edits work the same for every format.

use crate::error::{Error, Result};
use crate::utils::io;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
    Toml,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(Error::validation_invalid_argument(
                "path",
                format!(
                    "Unsupported config format for '{}' (expected .json, .yaml, .yml or .toml)",
                    path.display()
                ),
                None,
                Some(vec!["json".into(), "yaml".into(), "yml".into(), "toml".into()]),
            )),
        }
    }
}

/// Parse config text of the given format into a JSON value.
pub fn parse_structured(content: &str, format: FileFormat, origin: &str) -> Result<Value> {
    match format {
        FileFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::config_invalid_json(origin.to_string(), e)),
        FileFormat::Yaml => serde_yml::from_str(content).map_err(|e| {
            Error::config_invalid_value(origin, None, format!("Invalid YAML: {}", e))
        }),
        FileFormat::Toml => toml::from_str(content).map_err(|e| {
            Error::config_invalid_value(origin, None, format!("Invalid TOML: {}", e))
        }),
    }
}

/// Read a JSON/YAML/TOML file into a JSON value.
pub fn load_structured(path: &Path) -> Result<Value> {
    let format = FileFormat::from_path(path)?;
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    parse_structured(&content, format, &path.display().to_string())
}

/// Deserialize a typed value out of an already-loaded JSON value.
pub fn from_value<T: DeserializeOwned>(value: Value, context: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::config_invalid_value(context, None, e.to_string())
    })
}

/// Parse a flag value into the most specific JSON type.
/// Order: JSON literal → bool → number → string
pub fn parse_value(s: &str) -> Value {
    if let Ok(v) = serde_json::from_str(s) {
        return v;
    }
    match s {
        "true" => return json!(true),
        "false" => return json!(false),
        _ => {}
    }
    if let Ok(n) = s.parse::<i64>() {
        return json!(n);
    }
    if let Ok(n) = s.parse::<f64>() {
        return json!(n);
    }
    json!(s)
}

/// Apply `key=value` overrides on top of a JSON object.
///
/// Dotted keys (`a.b`) address nested objects. A null or missing base is
/// treated as an empty object.
pub fn apply_overrides(base: &mut Value, overrides: &[(String, String)]) -> Result<()> {
    if base.is_null() {
        *base = Value::Object(Map::new());
    }

    for (key, raw) in overrides {
        if key.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "set",
                format!("Override '={}' has an empty key", raw),
                None,
                None,
            ));
        }
        let pointer = format!("/{}", key.split('.').collect::<Vec<_>>().join("/"));
        set_json_pointer(base, &pointer, parse_value(raw))?;
    }

    Ok(())
}

// ============================================================================
// JSON Pointer Operations
// ============================================================================

fn pointer_tokens(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }

    if pointer == "/" || !pointer.starts_with('/') {
        return Err(Error::validation_invalid_argument(
            "pointer",
            format!("Invalid JSON pointer '{}'", pointer),
            None,
            None,
        ));
    }

    Ok(pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn parse_index(token: &str, len: usize) -> Result<usize> {
    let index = token.parse::<usize>().map_err(|_| {
        Error::config_invalid_value("arrayIndex", Some(token.to_string()), "Expected array index")
    })?;

    if index >= len {
        return Err(Error::config_invalid_value(
            "arrayIndex",
            Some(index.to_string()),
            "Array index out of bounds",
        ));
    }

    Ok(index)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk to the container addressed by `tokens`, creating objects on the way.
fn container_mut<'a>(root: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value> {
    let mut current = root;

    for token in tokens {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }

        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(arr) => {
                let index = parse_index(token, arr.len())?;
                &mut arr[index]
            }
            other => {
                return Err(Error::config_invalid_value(
                    token.clone(),
                    Some(value_type_name(other).to_string()),
                    "Expected object/array at pointer",
                ))
            }
        };
    }

    Ok(current)
}

pub fn set_json_pointer(root: &mut Value, pointer: &str, new_value: Value) -> Result<()> {
    let mut tokens = pointer_tokens(pointer)?;
    let Some(last) = tokens.pop() else {
        *root = new_value;
        return Ok(());
    };

    match container_mut(root, &tokens)? {
        Value::Object(map) => {
            map.insert(last, new_value);
            Ok(())
        }
        Value::Array(arr) => {
            let index = parse_index(&last, arr.len())?;
            arr[index] = new_value;
            Ok(())
        }
        other => Err(Error::config_invalid_value(
            "jsonPointer",
            Some(value_type_name(other).to_string()),
            "Cannot set child on non-container",
        )),
    }
}

pub fn remove_json_pointer(root: &mut Value, pointer: &str) -> Result<()> {
    let mut tokens = pointer_tokens(pointer)?;
    let Some(last) = tokens.pop() else {
        return Err(Error::validation_invalid_argument(
            "pointer",
            "Cannot remove the root JSON value",
            None,
            None,
        ));
    };

    let parent_ptr: String = tokens.iter().map(|t| format!("/{}", t)).collect();
    let Some(parent) = root.pointer_mut(&parent_ptr) else {
        return Err(Error::validation_invalid_argument(
            "pointer",
            format!("JSON pointer parent path not found: {}", parent_ptr),
            None,
            None,
        ));
    };

    match parent {
        Value::Object(map) => {
            map.remove(&last);
            Ok(())
        }
        Value::Array(arr) => {
            let index = parse_index(&last, arr.len())?;
            arr.remove(index);
            Ok(())
        }
        other => Err(Error::config_invalid_value(
            "jsonPointer",
            Some(value_type_name(other).to_string()),
            "Cannot remove child on non-container",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_prefers_json_literals() {
        assert_eq!(parse_value(r#"["a","b"]"#), json!(["a", "b"]));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("3"), json!(3));
        assert_eq!(parse_value("gcr.io/proj/app:v1"), json!("gcr.io/proj/app:v1"));
    }

    #[test]
    fn overrides_replace_and_nest() {
        let mut base = json!({"project_name": "old"});
        apply_overrides(
            &mut base,
            &[
                ("project_name".to_string(), "bookshelf".to_string()),
                ("labels.tier".to_string(), "web".to_string()),
            ],
        )
        .unwrap();

        assert_eq!(base["project_name"], "bookshelf");
        assert_eq!(base["labels"]["tier"], "web");
    }

    #[test]
    fn overrides_on_null_base_create_object() {
        let mut base = Value::Null;
        apply_overrides(&mut base, &[("image_tag".to_string(), "x:1".to_string())]).unwrap();
        assert_eq!(base, json!({"image_tag": "x:1"}));
    }

    #[test]
    fn remove_pointer_drops_key() {
        let mut root = json!({"defaults": {"cleanup": {"max_age_hours": 4}}});
        remove_json_pointer(&mut root, "/defaults/cleanup/max_age_hours").unwrap();
        assert_eq!(root, json!({"defaults": {"cleanup": {}}}));
    }

    #[test]
    fn pointer_must_start_with_slash() {
        let mut root = json!({});
        let err = set_json_pointer(&mut root, "defaults", json!(1)).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn yaml_and_toml_parse_to_same_value() {
        let yaml = "project_name: bookshelf\ncloudsql_secrets:\n  - cloudsql-creds\n";
        let toml = "project_name = \"bookshelf\"\ncloudsql_secrets = [\"cloudsql-creds\"]\n";

        let from_yaml = parse_structured(yaml, FileFormat::Yaml, "deploy.yaml").unwrap();
        let from_toml = parse_structured(toml, FileFormat::Toml, "deploy.toml").unwrap();

        assert_eq!(from_yaml, from_toml);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = FileFormat::from_path(Path::new("deploy.ini")).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }
}
