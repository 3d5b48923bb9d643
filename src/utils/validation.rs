//! Input validation primitives.
//!
//! Kubernetes object names, image references, Cloud SQL instance names and
//! Google Cloud project ids have fixed grammars. These helpers check them and
//! produce `validation.invalid_argument` errors. Values that pass are safe to
//! place unquoted in YAML.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

static GCP_PROJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{5,29}$").unwrap());

/// `[registry/]repository[:tag][@digest]`, no whitespace or YAML indicators.
static IMAGE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(
            r"^[A-Za-z0-9][A-Za-z0-9._-]*(:[0-9]+)?(/[A-Za-z0-9._-]+)*(:[A-Za-z0-9._-]+)?(@[A-Za-z0-9]+:[A-Fa-f0-9]+)?$",
        )
        .unwrap()
    });

/// `project:region:instance`, where the project may carry a `domain.com:` prefix.
static CLOUD_SQL_INSTANCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9.-]+:)?[a-z][a-z0-9-]*:[a-z0-9-]+:[a-z0-9-]+$").unwrap());

const DNS_LABEL_MAX: usize = 63;

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// RFC 1123 label: project names and secret names (which double as volume names).
pub fn dns_label(value: &str, field: &str) -> Result<()> {
    if value.len() > DNS_LABEL_MAX || !DNS_LABEL.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!(
                "'{}' must be at most {} lowercase alphanumeric characters or '-', starting and ending with an alphanumeric",
                value, DNS_LABEL_MAX
            ),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}

pub fn image_reference(value: &str, field: &str) -> Result<()> {
    if !IMAGE_REFERENCE.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!(
                "'{}' is not a container image reference such as gcr.io/project/app:v1",
                value
            ),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}

pub fn cloud_sql_instance(value: &str, field: &str) -> Result<()> {
    if !CLOUD_SQL_INSTANCE.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!(
                "'{}' is not a Cloud SQL connection name of the form project:region:instance",
                value
            ),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}

/// Google Cloud project id: 6-30 chars, lowercase letter first.
pub fn gcp_project_id(value: &str, field: &str) -> Result<()> {
    if !GCP_PROJECT_ID.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!(
                "Invalid Google Cloud Platform project id '{}': must be 6 to 30 lowercase letters, digits or hyphens and start with a letter",
                value
            ),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_non_empty_trims() {
        assert_eq!(require_non_empty("  web ", "f", "m").unwrap(), "web");
        assert!(require_non_empty("   ", "f", "m").is_err());
    }

    #[test]
    fn dns_label_accepts_and_rejects() {
        assert!(dns_label("bookshelf", "project_name").is_ok());
        assert!(dns_label("my-app-2", "project_name").is_ok());
        assert!(dns_label("My_App", "project_name").is_err());
        assert!(dns_label("-lead", "project_name").is_err());
        assert!(dns_label(&"a".repeat(64), "project_name").is_err());
    }

    #[test]
    fn image_reference_rejects_yaml_breaking_values() {
        assert!(image_reference("gcr.io/proj/bookshelf:v1", "image_tag").is_ok());
        assert!(image_reference("localhost:5000/app", "image_tag").is_ok());
        assert!(image_reference("app@sha256:0123abcd", "image_tag").is_ok());
        assert!(image_reference("gcr.io/proj/app:v1 #latest", "image_tag").is_err());
        assert!(image_reference("app: evil", "image_tag").is_err());
        assert!(image_reference("app\n  privileged: true", "image_tag").is_err());
    }

    #[test]
    fn cloud_sql_instance_rules() {
        assert!(cloud_sql_instance("proj:us-central1:bookshelf", "c").is_ok());
        assert!(cloud_sql_instance("example.com:proj:us-central1:db", "c").is_ok());
        assert!(cloud_sql_instance("bookshelf", "c").is_err());
        assert!(cloud_sql_instance("proj:us-central1:db=tcp:1", "c").is_err());
    }

    #[test]
    fn gcp_project_id_rules() {
        assert!(gcp_project_id("my-project-123", "project").is_ok());
        assert!(gcp_project_id("short", "project").is_err());
        assert!(gcp_project_id("1starts-with-digit", "project").is_err());
    }
}
