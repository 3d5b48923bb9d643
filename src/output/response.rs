use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use deckhand::error::Hint;
use deckhand::{Error, ErrorCode, Result};

/// `{"success": true, "data": ...}` or `{"success": false, "error": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'static str,
    pub message: &'a str,
    pub details: &'a Value,
    #[serde(skip_serializing_if = "no_hints")]
    pub hints: &'a [Hint],
}

fn no_hints(hints: &&[Hint]) -> bool {
    hints.is_empty()
}

impl<'a> Envelope<'a> {
    pub fn new(result: &'a Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    code: err.code.as_str(),
                    message: &err.message,
                    details: &err.details,
                    hints: &err.hints,
                }),
            },
        }
    }
}

/// Serialize a command's output, keeping its exit code. Errors take the
/// exit code of their category.
pub fn into_json<T: Serialize>(result: Result<(T, i32)>) -> (Result<Value>, i32) {
    let result = result.and_then(|(data, exit_code)| {
        serde_json::to_value(data)
            .map(|value| (value, exit_code))
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize output".to_string())))
    });

    match result {
        Ok((value, exit_code)) => (Ok(value), exit_code),
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

/// Print the envelope on stdout. A closed pipe is not an error.
pub fn emit(result: &Result<Value>) -> Result<()> {
    let payload = serde_json::to_string_pretty(&Envelope::new(result))
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize envelope".to_string())))?;

    match writeln!(io::stdout().lock(), "{}", payload) {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        )),
        _ => Ok(()),
    }
}

pub fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument
        | ErrorCode::ValidationInvalidJson
        | ErrorCode::TemplateSyntax
        | ErrorCode::TemplateUndefinedVariable
        | ErrorCode::DeploymentMissingField
        | ErrorCode::CredentialsMissing
        | ErrorCode::CredentialsInvalid => 2,

        ErrorCode::StageNotFound => 4,

        ErrorCode::StageExecutionFailed => 20,

        ErrorCode::InternalIoError | ErrorCode::InternalJsonError | ErrorCode::InternalUnexpected => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let result = Err(Error::stage_not_found("deploy", vec!["lint".to_string()]));
        let json = serde_json::to_value(Envelope::new(&result)).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "stage.not_found");
        assert_eq!(json["error"]["details"]["available"][0], "lint");
        assert!(json["error"]["hints"].is_array());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn hints_are_omitted_when_empty() {
        let result = Err(Error::internal_unexpected("boom"));
        let json = serde_json::to_value(Envelope::new(&result)).unwrap();
        assert!(json["error"].get("hints").is_none());
        assert_eq!(
            json["error"].as_object().unwrap().keys().collect::<Vec<_>>(),
            ["code", "details", "message"]
        );
    }

    #[test]
    fn success_envelope_wraps_data() {
        let result = Ok(json!({"written": true}));
        let json = serde_json::to_value(Envelope::new(&result)).unwrap();
        assert_eq!(json, json!({"success": true, "data": {"written": true}}));
    }

    #[test]
    fn exit_code_passes_through_on_success() {
        let (result, code) = into_json(Ok((json!({"status": "failed"}), 7)));
        assert_eq!(result.unwrap()["status"], "failed");
        assert_eq!(code, 7);
    }

    #[test]
    fn error_codes_map_to_exit_codes() {
        let cases = [
            (Error::deployment_missing_field(vec!["image_tag".to_string()]), 2),
            (Error::credentials_missing(Vec::new(), Vec::new()), 2),
            (Error::stage_not_found("x", Vec::new()), 4),
            (Error::internal_unexpected("boom"), 1),
        ];
        for (err, expected) in cases {
            let (_, code) = into_json::<()>(Err(err));
            assert_eq!(code, expected);
        }
    }
}
