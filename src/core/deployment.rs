use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::config;
use crate::error::{Error, Result};
use crate::utils::template::{Context, TemplateVars};
use crate::utils::validation;

/// Project values substituted into the deployment manifest.
///
/// Unknown keys in the source file are ignored. Required fields are kept as
/// `Option` so a missing or null value surfaces as `deployment.missing_field`
/// rather than a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_sql_connection_string: Option<String>,

    /// Application secrets, mounted into the app container.
    #[serde(default, alias = "app_secrets", skip_serializing_if = "Option::is_none")]
    pub django_secrets: Option<Vec<String>>,

    /// Database credential secrets, mounted into the proxy sidecar.
    #[serde(
        default,
        alias = "database_secrets",
        skip_serializing_if = "Option::is_none"
    )]
    pub cloudsql_secrets: Option<Vec<String>>,

    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretGroup {
    App,
    Database,
}

impl SecretGroup {
    pub fn field(&self) -> &'static str {
        match self {
            SecretGroup::App => TemplateVars::DJANGO_SECRETS,
            SecretGroup::Database => TemplateVars::CLOUDSQL_SECRETS,
        }
    }
}

impl DeploymentConfig {
    pub fn project_name(&self) -> &str {
        self.project_name.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn image_tag(&self) -> &str {
        self.image_tag.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn cloud_sql_connection_string(&self) -> &str {
        self.cloud_sql_connection_string
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
    }

    /// Secret names for a group. Absent and empty lists are the same.
    pub fn secrets(&self, group: SecretGroup) -> &[String] {
        let list = match group {
            SecretGroup::App => &self.django_secrets,
            SecretGroup::Database => &self.cloudsql_secrets,
        };
        list.as_deref().unwrap_or(&[])
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.project_name().is_empty() {
            missing.push(TemplateVars::PROJECT_NAME.to_string());
        }
        if self.image_tag().is_empty() {
            missing.push(TemplateVars::IMAGE_TAG.to_string());
        }
        // The proxy sidecar is always rendered and cannot start without it.
        if self.cloud_sql_connection_string().is_empty() {
            missing.push(TemplateVars::CLOUD_SQL_CONNECTION_STRING.to_string());
        }
        if !missing.is_empty() {
            return Err(Error::deployment_missing_field(missing));
        }

        validation::dns_label(self.project_name(), TemplateVars::PROJECT_NAME)?;
        validation::image_reference(self.image_tag(), TemplateVars::IMAGE_TAG)?;
        validation::cloud_sql_instance(
            self.cloud_sql_connection_string(),
            TemplateVars::CLOUD_SQL_CONNECTION_STRING,
        )?;

        if self.replicas == 0 {
            return Err(Error::validation_invalid_argument(
                TemplateVars::REPLICAS,
                "replicas must be at least 1",
                None,
                None,
            ));
        }

        // Each secret becomes a pod volume, and volume names share one namespace.
        let mut seen = HashSet::new();
        for group in [SecretGroup::App, SecretGroup::Database] {
            for name in self.secrets(group) {
                validation::dns_label(name, group.field())?;
                if !seen.insert(name.as_str()) {
                    return Err(Error::validation_invalid_argument(
                        group.field(),
                        format!("Secret '{}' is listed more than once", name),
                        Some(name.clone()),
                        None,
                    ));
                }
            }
        }

        Ok(())
    }

    /// Template variables for this config.
    pub fn to_context(&self, cloudsql_proxy_image: &str) -> Context {
        Context::new()
            .with_str(TemplateVars::PROJECT_NAME, self.project_name())
            .with_str(TemplateVars::IMAGE_TAG, self.image_tag())
            .with_str(
                TemplateVars::CLOUD_SQL_CONNECTION_STRING,
                self.cloud_sql_connection_string(),
            )
            .with_str(TemplateVars::CLOUDSQL_PROXY_IMAGE, cloudsql_proxy_image)
            .with_str(TemplateVars::REPLICAS, self.replicas.to_string())
            .with_list(
                TemplateVars::DJANGO_SECRETS,
                self.secrets(SecretGroup::App).to_vec(),
            )
            .with_list(
                TemplateVars::CLOUDSQL_SECRETS,
                self.secrets(SecretGroup::Database).to_vec(),
            )
    }
}

/// Build a config from a JSON value plus `key=value` overrides, then validate.
pub fn from_value(mut value: Value, overrides: &[(String, String)]) -> Result<DeploymentConfig> {
    config::apply_overrides(&mut value, overrides)?;

    if !value.is_object() {
        return Err(Error::config_invalid_value(
            "deployment",
            None,
            "Deployment config must be a mapping of field names to values",
        ));
    }

    let deployment: DeploymentConfig = config::from_value(value, "deployment")?;
    deployment.validate()?;
    Ok(deployment)
}

/// Load a deployment config file (JSON, YAML or TOML) and apply overrides.
/// With no file, the config is built from overrides alone.
pub fn load(path: Option<&Path>, overrides: &[(String, String)]) -> Result<DeploymentConfig> {
    let base = match path {
        Some(path) => config::load_structured(path)?,
        None => Value::Null,
    };
    from_value(base, overrides)
}
