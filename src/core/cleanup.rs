//! Expired test resource cleanup.
//!
//! Takes a resource listing (as printed by `gcloud ... list --format=json` or
//! a raw API response), picks everything created longer ago than the max age
//! and optionally runs a delete command per resource.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config;
use crate::error::{Error, Result};
use crate::pipeline::PipelineStage;
use crate::stage_executor::StageExecutor;
use crate::utils::io;
use crate::utils::shell;
use crate::utils::template::{Context, Template, TemplateVars};

/// Keys under which list APIs wrap their resources.
const LIST_KEYS: &[&str] = &["items", "clusters", "buckets", "instances"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    #[serde(
        default,
        alias = "createTime",
        alias = "timeCreated",
        alias = "create_time",
        alias = "creationTimestamp"
    )]
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Whether a resource created at `created` has outlived `max_age`.
///
/// Timestamps that are not RFC 3339 are never deleted; the resource is kept
/// for debugging.
pub fn should_delete(created: &str, now: DateTime<Utc>, max_age: Duration) -> bool {
    match DateTime::parse_from_rfc3339(created.trim()) {
        Ok(created) => now.signed_duration_since(created) > max_age,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupPlan {
    pub evaluated_at: DateTime<Utc>,
    pub max_age_hours: i64,
    pub expired: Vec<Resource>,
    pub kept: Vec<Resource>,
    /// Names of kept resources whose timestamp could not be parsed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unparseable: Vec<String>,
}

pub fn plan(resources: Vec<Resource>, now: DateTime<Utc>, max_age_hours: i64) -> Result<CleanupPlan> {
    let max_age = Duration::try_hours(max_age_hours)
        .filter(|age| *age >= Duration::zero())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "max_age_hours",
                "Max age must be a non-negative number of hours",
                Some(max_age_hours.to_string()),
                None,
            )
        })?;
    let mut plan = CleanupPlan {
        evaluated_at: now,
        max_age_hours,
        expired: Vec::new(),
        kept: Vec::new(),
        unparseable: Vec::new(),
    };

    for resource in resources {
        if DateTime::parse_from_rfc3339(resource.created.trim()).is_err() {
            plan.unparseable.push(resource.name.clone());
        }
        if should_delete(&resource.created, now, max_age) {
            plan.expired.push(resource);
        } else {
            plan.kept.push(resource);
        }
    }

    Ok(plan)
}

/// Parse a listing: a JSON array, or an object wrapping one under a list key.
pub fn parse_resources(value: Value) -> Result<Vec<Resource>> {
    let items = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => LIST_KEYS
            .iter()
            .find_map(|key| map.remove(*key))
            .unwrap_or_else(|| Value::Array(Vec::new())),
        _ => {
            return Err(Error::validation_invalid_argument(
                "input",
                "Resource listing must be a JSON array or an object with an items list",
                None,
                Some(LIST_KEYS.iter().map(|k| k.to_string()).collect()),
            ))
        }
    };

    config::from_value(items, "resources")
}

pub fn load_resources(path: &Path) -> Result<Vec<Resource>> {
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| Error::validation_invalid_json(e, Some(path.display().to_string()), None))?;
    parse_resources(value)
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteCommand {
    pub name: String,
    pub command: String,
}

/// Render `template` once per expired resource. `{{ name }}` and `{{ kind }}`
/// are shell-quoted before substitution.
pub fn delete_commands(plan: &CleanupPlan, template: &str) -> Result<Vec<DeleteCommand>> {
    let template = Template::parse(template)?;

    plan.expired
        .iter()
        .map(|resource| {
            let context = Context::new()
                .with_str(TemplateVars::NAME, shell::quote_arg(&resource.name))
                .with_str(
                    TemplateVars::KIND,
                    shell::quote_arg(resource.kind.as_deref().unwrap_or("")),
                );
            Ok(DeleteCommand {
                name: resource.name.clone(),
                command: template.render(&context)?.trim().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub name: String,
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run each delete command. Failures are recorded and do not stop the rest.
pub fn execute(
    commands: &[DeleteCommand],
    executor: &dyn StageExecutor,
    env: &[(String, String)],
) -> Vec<DeleteResult> {
    commands
        .iter()
        .map(|delete| {
            let stage = PipelineStage::new(
                format!("delete-{}", delete.name),
                vec![delete.command.clone()],
            );
            match executor.execute_stage(&stage, env) {
                Ok(outcome) => {
                    if outcome.success {
                        log_status!("cleanup", "Deleted {}", delete.name);
                    }
                    DeleteResult {
                        name: delete.name.clone(),
                        command: delete.command.clone(),
                        success: outcome.success,
                        exit_code: outcome.exit_code,
                        error: outcome.error,
                    }
                }
                Err(err) => DeleteResult {
                    name: delete.name.clone(),
                    command: delete.command.clone(),
                    success: false,
                    exit_code: 1,
                    error: Some(err.message),
                },
            }
        })
        .collect()
}
