//! Kubernetes manifest rendering.
//!
//! The built-in template produces two documents: a Deployment running the
//! application container next to a Cloud SQL proxy sidecar, and a LoadBalancer
//! Service forwarding port 80 to container port 8080.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults;
use crate::deployment::{DeploymentConfig, SecretGroup};
use crate::error::{Error, Result};
use crate::utils::template::Template;
use crate::utils::validation;

pub const SERVICE_PORT: u16 = 80;
pub const CONTAINER_PORT: u16 = 8080;

pub const BUILTIN_TEMPLATE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ project_name }}
  labels:
    app: {{ project_name }}
spec:
  replicas: {{ replicas }}
  selector:
    matchLabels:
      app: {{ project_name }}
  template:
    metadata:
      labels:
        app: {{ project_name }}
    spec:
      containers:
      - name: {{ project_name }}-app
        image: {{ image_tag }}
        imagePullPolicy: Always
        ports:
        - containerPort: 8080
        env:
        - name: DATABASE_HOST
          value: "127.0.0.1"
        - name: DATABASE_PORT
          value: "5432"
        {% if django_secrets %}
        volumeMounts:
        {% for secret in django_secrets %}
        - name: {{ secret }}
          mountPath: /secrets/django/{{ secret }}
          readOnly: true
        {% endfor %}
        {% endif %}
      - name: cloudsql-proxy
        image: {{ cloudsql_proxy_image }}
        command: ["/cloud_sql_proxy", "--dir=/cloudsql",
                  "-instances={{ cloud_sql_connection_string }}=tcp:5432"]
        {% if cloudsql_secrets %}
        volumeMounts:
        {% for secret in cloudsql_secrets %}
        - name: {{ secret }}
          mountPath: /secrets/cloudsql/{{ secret }}
          readOnly: true
        {% endfor %}
        {% endif %}
      {% if django_secrets or cloudsql_secrets %}
      volumes:
      {% for secret in cloudsql_secrets %}
      - name: {{ secret }}
        secret:
          secretName: {{ secret }}
      {% endfor %}
      {% for secret in django_secrets %}
      - name: {{ secret }}
        secret:
          secretName: {{ secret }}
      {% endfor %}
      {% endif %}
---
apiVersion: v1
kind: Service
metadata:
  name: {{ project_name }}
  labels:
    app: {{ project_name }}
spec:
  type: LoadBalancer
  ports:
  - port: 80
    targetPort: 8080
  selector:
    app: {{ project_name }}
"#;

/// Where the template comes from and what the sidecar runs.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Template source; the built-in manifest when `None`.
    pub template: Option<String>,
    pub cloudsql_proxy_image: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            template: None,
            cloudsql_proxy_image: defaults::builtin_defaults().render.cloudsql_proxy_image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedManifest {
    #[serde(skip)]
    pub content: String,
    pub resources: Vec<ResourceRef>,
    pub app_secret_volumes: usize,
    pub database_secret_volumes: usize,
}

/// Render the manifest for a deployment config.
pub fn render(config: &DeploymentConfig, options: &RenderOptions) -> Result<RenderedManifest> {
    config.validate()?;
    validation::image_reference(
        &options.cloudsql_proxy_image,
        "defaults.render.cloudsql_proxy_image",
    )?;

    let source = options.template.as_deref().unwrap_or(BUILTIN_TEMPLATE);
    let template = Template::parse(source)?;
    let content = template.render(&config.to_context(&options.cloudsql_proxy_image))?;
    let resources = resources(&content)?;

    Ok(RenderedManifest {
        content,
        resources,
        app_secret_volumes: config.secrets(SecretGroup::App).len(),
        database_secret_volumes: config.secrets(SecretGroup::Database).len(),
    })
}

/// Parse rendered YAML documents and list the resources they declare.
pub fn resources(content: &str) -> Result<Vec<ResourceRef>> {
    let mut found = Vec::new();

    for (index, document) in serde_yml::Deserializer::from_str(content).enumerate() {
        let value = Value::deserialize(document).map_err(|e| {
            Error::config_invalid_value(
                "manifest",
                None,
                format!("Rendered document {} is not valid YAML: {}", index + 1, e),
            )
        })?;

        if value.is_null() {
            continue;
        }

        let field = |pointer: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match (field("/apiVersion"), field("/kind"), field("/metadata/name")) {
            (Some(api_version), Some(kind), Some(name)) => found.push(ResourceRef {
                api_version,
                kind,
                name,
            }),
            _ => {
                return Err(Error::config_invalid_value(
                    "manifest",
                    None,
                    format!(
                        "Rendered document {} lacks apiVersion, kind or metadata.name",
                        index + 1
                    ),
                ))
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment;
    use serde_json::json;

    fn config(value: Value) -> DeploymentConfig {
        deployment::from_value(value, &[]).unwrap()
    }

    fn deployment_doc(content: &str) -> Value {
        let doc = serde_yml::Deserializer::from_str(content).next().unwrap();
        Value::deserialize(doc).unwrap()
    }

    #[test]
    fn bookshelf_example() {
        let rendered = render(
            &config(json!({
                "project_name": "bookshelf",
                "image_tag": "gcr.io/proj/bookshelf:v1",
                "cloud_sql_connection_string": "proj:us-central1:bookshelf",
                "cloudsql_secrets": ["cloudsql-creds"],
                "django_secrets": [],
            })),
            &RenderOptions::default(),
        )
        .unwrap();

        assert_eq!(rendered.content.matches("image: gcr.io/proj/bookshelf:v1").count(), 1);
        assert_eq!(rendered.content.matches("- name: cloudsql-creds").count(), 2);
        assert_eq!(rendered.content.matches("mountPath: /secrets/cloudsql/cloudsql-creds").count(), 1);
        assert!(!rendered.content.contains("/secrets/django/"));
        assert_eq!(rendered.app_secret_volumes, 0);
        assert_eq!(rendered.database_secret_volumes, 1);

        let doc = deployment_doc(&rendered.content);
        let containers = doc.pointer("/spec/template/spec/containers").unwrap();
        assert!(containers[0].get("volumeMounts").is_none());
        assert_eq!(containers[1]["volumeMounts"][0]["name"], "cloudsql-creds");
        assert_eq!(
            doc.pointer("/spec/template/spec/volumes/0/secret/secretName").unwrap(),
            "cloudsql-creds"
        );
    }

    #[test]
    fn produces_deployment_and_service() {
        let rendered = render(
            &config(json!({"project_name": "bookshelf", "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db"})),
            &RenderOptions::default(),
        )
        .unwrap();

        let kinds: Vec<&str> = rendered.resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, ["Deployment", "Service"]);
        assert!(rendered.resources.iter().all(|r| r.name == "bookshelf"));

        let service = serde_yml::Deserializer::from_str(&rendered.content)
            .nth(1)
            .map(|doc| Value::deserialize(doc).unwrap())
            .unwrap();
        assert_eq!(service["spec"]["type"], "LoadBalancer");
        assert_eq!(service["spec"]["ports"][0]["port"], json!(SERVICE_PORT));
        assert_eq!(service["spec"]["ports"][0]["targetPort"], json!(CONTAINER_PORT));
    }

    #[test]
    fn secrets_render_one_mount_and_one_volume_each_in_order() {
        let rendered = render(
            &config(json!({
                "project_name": "web",
                "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db",
                "django_secrets": ["django-key", "django-mail", "django-storage"],
                "cloudsql_secrets": ["cloudsql-creds", "cloudsql-admin"],
            })),
            &RenderOptions::default(),
        )
        .unwrap();

        let doc = deployment_doc(&rendered.content);
        let app_mounts: Vec<&str> = doc
            .pointer("/spec/template/spec/containers/0/volumeMounts")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(app_mounts, ["django-key", "django-mail", "django-storage"]);

        let proxy_mounts = doc
            .pointer("/spec/template/spec/containers/1/volumeMounts")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(proxy_mounts.len(), 2);

        let volumes: Vec<&str> = doc
            .pointer("/spec/template/spec/volumes")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|v| v["secret"]["secretName"].as_str().unwrap())
            .collect();
        assert_eq!(
            volumes,
            ["cloudsql-creds", "cloudsql-admin", "django-key", "django-mail", "django-storage"]
        );
    }

    #[test]
    fn no_secrets_means_no_volume_sections() {
        let rendered = render(
            &config(json!({"project_name": "web", "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db"})),
            &RenderOptions::default(),
        )
        .unwrap();

        assert!(!rendered.content.contains("volumeMounts:"));
        assert!(!rendered.content.contains("volumes:"));
        assert!(!rendered.content.contains("{%"));
    }

    #[test]
    fn render_rejects_unvalidated_config() {
        let config = DeploymentConfig {
            image_tag: Some("img:1".to_string()),
            ..DeploymentConfig::default()
        };
        let err = render(&config, &RenderOptions::default()).unwrap_err();
        assert_eq!(err.code.as_str(), "deployment.missing_field");
    }

    #[test]
    fn proxy_image_must_be_an_image_reference() {
        let options = RenderOptions {
            cloudsql_proxy_image: "gce-proxy: latest".to_string(),
            ..RenderOptions::default()
        };
        let err = render(
            &config(json!({"project_name": "web", "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db"})),
            &options,
        )
        .unwrap_err();
        assert_eq!(err.details["field"], "defaults.render.cloudsql_proxy_image");
    }

    #[test]
    fn custom_template_is_used() {
        let options = RenderOptions {
            template: Some(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ project_name }}-config\ndata:\n  image: \"{{ image_tag }}\"\n"
                    .to_string(),
            ),
            ..RenderOptions::default()
        };
        let rendered = render(
            &config(json!({"project_name": "web", "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db"})),
            &options,
        )
        .unwrap();

        assert_eq!(rendered.resources.len(), 1);
        assert_eq!(rendered.resources[0].name, "web-config");
    }

    #[test]
    fn template_producing_invalid_yaml_fails() {
        let options = RenderOptions {
            template: Some("kind: [unclosed\n".to_string()),
            ..RenderOptions::default()
        };
        let err = render(
            &config(json!({"project_name": "web", "image_tag": "img:1", "cloud_sql_connection_string": "proj:us-central1:db"})),
            &options,
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }
}
