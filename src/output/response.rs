//! CLI response formatting and output.
//!
//! Provides the JSON envelope, printing, and exit code mapping.

use roadie::error::Hint;
use roadie::{Error, ErrorKind, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn print_result<T: Serialize>(result: Result<T>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(&err);
            (Err(err), exit_code)
        }
    }
}

/// A failed remote command exits with that command's code; configuration
/// problems exit 2; an operator abort and internal errors exit 1.
pub fn exit_code_for_error(err: &Error) -> i32 {
    match err.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::RemoteExecution => err.remote_exit_code().unwrap_or(1).clamp(1, 255),
        ErrorKind::UserAbort | ErrorKind::Internal => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadie::error::RemoteCommandFailedDetails;

    fn remote(exit_code: i32) -> Error {
        Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "git pull".to_string(),
            exit_code,
            stdout: String::new(),
            stderr: "fatal".to_string(),
            target: None,
        })
    }

    #[test]
    fn remote_failures_exit_with_the_remote_code() {
        assert_eq!(exit_code_for_error(&remote(128)), 128);
        assert_eq!(exit_code_for_error(&remote(-1)), 1);
        assert_eq!(exit_code_for_error(&remote(0)), 1);
        assert_eq!(exit_code_for_error(&remote(300)), 255);
    }

    #[test]
    fn configuration_and_abort_codes() {
        assert_eq!(exit_code_for_error(&Error::missing_target("deploy")), 2);
        assert_eq!(
            exit_code_for_error(&Error::unknown_environment("qa", vec!["local".to_string()])),
            2
        );
        assert_eq!(exit_code_for_error(&Error::user_abort("make test", "Continue?")), 1);
    }

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let err = Error::unknown_environment("qa", vec!["local".to_string()]);
        let json = serde_json::to_value(CliResponse::<()>::from_error(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "config.unknown_environment");
        assert!(json["error"]["hints"].is_array());
        assert!(json.get("data").is_none());
    }
}
