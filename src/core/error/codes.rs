use super::ErrorCode;

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::TemplateSyntax => "template.syntax",
            ErrorCode::TemplateUndefinedVariable => "template.undefined_variable",

            ErrorCode::DeploymentMissingField => "deployment.missing_field",

            ErrorCode::StageNotFound => "stage.not_found",
            ErrorCode::StageExecutionFailed => "stage.execution_failed",

            ErrorCode::CredentialsMissing => "credentials.missing",
            ErrorCode::CredentialsInvalid => "credentials.invalid",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}
