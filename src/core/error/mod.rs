use serde::{Deserialize, Serialize};
use serde_json::Value;

mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    TemplateSyntax,
    TemplateUndefinedVariable,

    DeploymentMissingField,

    StageNotFound,
    StageExecutionFailed,

    CredentialsMissing,
    CredentialsInvalid,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSyntaxDetails {
    pub problem: String,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFieldDetails {
    pub fields: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNotFoundDetails {
    pub stage: String,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecutionFailedDetails {
    pub stage: String,
    pub command: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsMissingDetails {
    pub stages: Vec<String>,
    pub variables: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn validation_invalid_json(
        err: serde_json::Error,
        context: Option<String>,
        input_preview: Option<String>,
    ) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
            "inputPreview": input_preview,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn template_syntax(problem: impl Into<String>, offset: usize) -> Self {
        let problem = problem.into();
        let message = format!("Template syntax error at byte {}: {}", offset, problem);
        Self::new(
            ErrorCode::TemplateSyntax,
            message,
            to_details(TemplateSyntaxDetails { problem, offset }),
        )
    }

    pub fn template_undefined_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::TemplateUndefinedVariable,
            format!("Template references undefined variable '{}'", name),
            serde_json::json!({ "name": name }),
        )
    }

    pub fn deployment_missing_field(fields: Vec<String>) -> Self {
        let message = format!("Deployment config is missing {}", fields.join(", "));
        Self::new(
            ErrorCode::DeploymentMissingField,
            message,
            to_details(MissingFieldDetails { fields }),
        )
        .with_hint("Set the field in the config file or pass --set <field>=<value>")
    }

    pub fn stage_not_found(stage: impl Into<String>, available: Vec<String>) -> Self {
        let stage = stage.into();
        Self::new(
            ErrorCode::StageNotFound,
            format!("Stage '{}' is not defined in the pipeline", stage),
            to_details(StageNotFoundDetails { stage, available }),
        )
        .with_hint("Run 'deckhand pipeline list' to see available stages")
    }

    pub fn stage_execution_failed(details: StageExecutionFailedDetails) -> Self {
        Self::new(
            ErrorCode::StageExecutionFailed,
            "Stage command could not be executed",
            to_details(details),
        )
    }

    pub fn credentials_missing(stages: Vec<String>, variables: Vec<String>) -> Self {
        let hint = format!("Export {} before running these stages", variables.join(" or "));
        Self::new(
            ErrorCode::CredentialsMissing,
            "Selected stages require cloud credentials but none were provided",
            to_details(CredentialsMissingDetails { stages, variables }),
        )
        .with_hint(hint)
    }

    pub fn credentials_invalid(problem: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CredentialsInvalid,
            "Invalid cloud credentials",
            serde_json::json!({ "problem": problem.into() }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
