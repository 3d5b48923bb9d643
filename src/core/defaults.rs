use serde::{Deserialize, Serialize};
use std::fs;

use crate::paths;

/// Root configuration structure for deckhand.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeckhandConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via deckhand.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_render")]
    pub render: RenderConfig,

    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,

    #[serde(default = "default_credentials")]
    pub credentials: CredentialsConfig,

    #[serde(default = "default_cleanup")]
    pub cleanup: CleanupConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            render: default_render(),
            pipeline: default_pipeline(),
            credentials: default_credentials(),
            cleanup: default_cleanup(),
        }
    }
}

/// Manifest rendering defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Template used instead of the built-in manifest when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,

    #[serde(default = "default_cloudsql_proxy_image")]
    pub cloudsql_proxy_image: String,
}

/// Pipeline runner defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline definition used instead of the built-in stages when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_path: Option<String>,

    /// Program and leading arguments used to run each stage command
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Environment variable names and file location for cloud credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_blob_var")]
    pub blob_var: String,

    #[serde(default = "default_project_var")]
    pub project_var: String,

    #[serde(default = "default_path_var")]
    pub path_var: String,

    #[serde(default = "default_credentials_path")]
    pub default_path: String,
}

/// Expired-resource cleanup defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_render() -> RenderConfig {
    RenderConfig {
        template_path: None,
        cloudsql_proxy_image: default_cloudsql_proxy_image(),
    }
}

fn default_cloudsql_proxy_image() -> String {
    "gcr.io/cloudsql-docker/gce-proxy:1.16".to_string()
}

fn default_pipeline() -> PipelineConfig {
    PipelineConfig {
        definition_path: None,
        shell: default_shell(),
        poll_interval_ms: default_poll_interval_ms(),
    }
}

fn default_shell() -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd".to_string(), "/C".to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string()]
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_credentials() -> CredentialsConfig {
    CredentialsConfig {
        blob_var: default_blob_var(),
        project_var: default_project_var(),
        path_var: default_path_var(),
        default_path: default_credentials_path(),
    }
}

fn default_blob_var() -> String {
    "GCLOUD_SERVICE_KEY".to_string()
}

fn default_project_var() -> String {
    "GOOGLE_PROJECT_ID".to_string()
}

fn default_path_var() -> String {
    "GOOGLE_APPLICATION_CREDENTIALS".to_string()
}

fn default_credentials_path() -> String {
    "~/.config/deckhand/service-account.json".to_string()
}

fn default_cleanup() -> CleanupConfig {
    CleanupConfig {
        max_age_hours: default_max_age_hours(),
    }
}

fn default_max_age_hours() -> i64 {
    2
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If deckhand.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    read_config().unwrap_or_default().defaults
}

/// Load deckhand.json strictly. A missing file reads as built-in
/// defaults; an unreadable or malformed one is an error.
pub fn read_config() -> crate::Result<DeckhandConfig> {
    let path = paths::deckhand_json()?;

    if !path.exists() {
        return Ok(DeckhandConfig::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| crate::Error::config_invalid_json(path.display().to_string(), e))
}

/// Save config to deckhand.json (creates if missing).
pub fn save_config(config: &DeckhandConfig) -> crate::Result<()> {
    let path = paths::deckhand_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        crate::Error::internal_json(e.to_string(), Some("serialize deckhand.json".to_string()))
    })?;

    crate::utils::io::write_file_atomic(&path, &content, "write deckhand.json")
}

pub fn config_exists() -> bool {
    paths::deckhand_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Delete deckhand.json (reset to defaults)
pub fn reset_config() -> crate::Result<bool> {
    let path = paths::deckhand_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub fn config_path() -> crate::Result<String> {
    Ok(paths::deckhand_json()?.display().to_string())
}

/// Built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
