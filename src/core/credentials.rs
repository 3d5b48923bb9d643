//! Cloud credential provisioning for pipeline stages.
//!
//! A service account key arrives through the environment, either as raw JSON
//! or base64-encoded JSON. It is written once to a file readable only by the
//! owner, and stages receive its path plus the project id.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::defaults::CredentialsConfig;
use crate::error::{Error, Result};
use crate::paths;
use crate::utils::validation;

/// Environment variable the Cloud SDK reads for its default project.
pub const CLOUDSDK_PROJECT_VAR: &str = "CLOUDSDK_CORE_PROJECT";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloudEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// True when the key file was written during this resolution.
    pub written: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CloudEnv {
    pub fn has_credentials(&self) -> bool {
        self.credentials_path.is_some()
    }

    /// Variables exported to every stage.
    pub fn env(&self, config: &CredentialsConfig) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(path) = &self.credentials_path {
            env.push((config.path_var.clone(), path.display().to_string()));
        }
        if let Some(project) = &self.project_id {
            env.push((config.project_var.clone(), project.clone()));
            env.push((CLOUDSDK_PROJECT_VAR.to_string(), project.clone()));
        }
        env
    }
}

/// Resolve credentials and project id from `lookup` (normally the process env).
///
/// Precedence: a key blob is written to the path named by `path_var`, or to
/// `default_path`. Without a blob, an existing file at `path_var` is used.
pub fn resolve<F>(config: &CredentialsConfig, lookup: F) -> Result<CloudEnv>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut env = CloudEnv::default();

    if let Some(project) = get(&config.project_var) {
        let project = project.trim().to_string();
        validation::gcp_project_id(&project, &config.project_var)?;
        env.project_id = Some(project);
    }

    let explicit_path = get(&config.path_var).map(|p| paths::expand(p.trim()));

    if let Some(blob) = get(&config.blob_var) {
        let key = decode_blob(&blob)?;
        let path = explicit_path.unwrap_or_else(|| paths::expand(&config.default_path));
        write_read_only(&path, &key)?;
        log_status!("credentials", "Wrote service account key to {}", path.display());
        env.credentials_path = Some(path);
        env.written = true;
    } else if let Some(path) = explicit_path {
        if path.is_file() {
            env.credentials_path = Some(path);
        } else {
            env.warnings.push(format!(
                "{} points to {}, which does not exist",
                config.path_var,
                path.display()
            ));
        }
    }

    Ok(env)
}

/// Lookup backed by the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Accept raw JSON or base64-encoded JSON; the result must be a JSON object.
pub fn decode_blob(blob: &str) -> Result<String> {
    let trimmed = blob.trim();

    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        let compact: String = trimmed.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| {
                Error::credentials_invalid(format!("Key is neither JSON nor base64: {}", e))
            })?;
        String::from_utf8(bytes)
            .map_err(|_| Error::credentials_invalid("Decoded key is not UTF-8 text"))?
    };

    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(_)) => Ok(json),
        Ok(_) => Err(Error::credentials_invalid("Key must be a JSON object")),
        Err(e) => Err(Error::credentials_invalid(format!("Key is not valid JSON: {}", e))),
    }
}

/// Replace `path` with `content`, leaving it readable only by the owner.
fn write_read_only(path: &Path, content: &str) -> Result<()> {
    let io_err = |e: std::io::Error| {
        Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    // A previous run leaves the file read-only, so it cannot be opened for writing.
    if path.exists() {
        fs::remove_file(path).map_err(io_err)?;
    }

    fs::write(path, content).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(io_err)?;
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path).map_err(io_err)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms).map_err(io_err)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use std::collections::HashMap;

    const KEY: &str = r#"{"type": "service_account", "project_id": "my-project-1"}"#;

    fn config(dir: &Path) -> CredentialsConfig {
        CredentialsConfig {
            default_path: dir.join("key.json").display().to_string(),
            ..crate::defaults::builtin_defaults().credentials
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn raw_and_base64_blobs_decode_to_same_json() {
        assert_eq!(decode_blob(KEY).unwrap(), KEY);
        assert_eq!(decode_blob(&STANDARD.encode(KEY)).unwrap(), KEY);
    }

    #[test]
    fn non_object_keys_are_rejected() {
        let err = decode_blob(&STANDARD.encode("[1, 2]")).unwrap_err();
        assert_eq!(err.code.as_str(), "credentials.invalid");
        assert!(decode_blob("not a key!").is_err());
    }

    #[test]
    fn blob_is_written_to_default_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path());

        let env = resolve(
            &config,
            lookup(&[("GCLOUD_SERVICE_KEY", KEY), ("GOOGLE_PROJECT_ID", "my-project-1")]),
        )
        .unwrap();

        let path = dir.path().join("key.json");
        assert!(env.written);
        assert_eq!(env.credentials_path.as_deref(), Some(path.as_path()));
        assert_eq!(fs::read_to_string(&path).unwrap(), KEY);

        let vars = env.env(&config);
        assert!(vars.contains(&(
            "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            path.display().to_string()
        )));
        assert!(vars.contains(&("CLOUDSDK_CORE_PROJECT".to_string(), "my-project-1".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_read_only_and_rewritable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path());

        resolve(&config, lookup(&[("GCLOUD_SERVICE_KEY", KEY)])).unwrap();
        let second = r#"{"type": "service_account"}"#;
        resolve(&config, lookup(&[("GCLOUD_SERVICE_KEY", second)])).unwrap();

        let path = dir.path().join("key.json");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o400);
        assert_eq!(fs::read_to_string(&path).unwrap(), second);
    }

    #[test]
    fn explicit_path_var_receives_the_blob() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("nested").join("sa.json");
        let target_str = target.display().to_string();

        let env = resolve(
            &config(dir.path()),
            lookup(&[
                ("GCLOUD_SERVICE_KEY", KEY),
                ("GOOGLE_APPLICATION_CREDENTIALS", target_str.as_str()),
            ]),
        )
        .unwrap();

        assert_eq!(env.credentials_path, Some(target.clone()));
        assert!(target.is_file());
    }

    #[test]
    fn existing_file_is_used_without_blob() {
        let dir = tempfile::TempDir::new().unwrap();
        let existing = dir.path().join("existing.json");
        fs::write(&existing, KEY).unwrap();
        let existing_str = existing.display().to_string();

        let env = resolve(
            &config(dir.path()),
            lookup(&[("GOOGLE_APPLICATION_CREDENTIALS", existing_str.as_str())]),
        )
        .unwrap();

        assert!(!env.written);
        assert!(env.has_credentials());
    }

    #[test]
    fn missing_file_without_blob_warns() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = resolve(
            &config(dir.path()),
            lookup(&[("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/sa.json")]),
        )
        .unwrap();

        assert!(!env.has_credentials());
        assert_eq!(env.warnings.len(), 1);
    }

    #[test]
    fn invalid_project_id_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = resolve(&config(dir.path()), lookup(&[("GOOGLE_PROJECT_ID", "My_Project")]))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn empty_environment_resolves_to_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = resolve(&config(dir.path()), lookup(&[("GCLOUD_SERVICE_KEY", "  ")])).unwrap();
        assert!(!env.has_credentials());
        assert!(env.env(&config(dir.path())).is_empty());
    }
}
