use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigUnknownEnvironment,
    ConfigMissingTarget,
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    RemoteCommandFailed,

    RunUserAbort,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigUnknownEnvironment => "config.unknown_environment",
            ErrorCode::ConfigMissingTarget => "config.missing_target",
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::RunUserAbort => "run.user_abort",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::ConfigUnknownEnvironment
            | ErrorCode::ConfigMissingTarget
            | ErrorCode::ConfigMissingKey
            | ErrorCode::ConfigInvalidJson
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ValidationInvalidArgument => ErrorKind::Configuration,

            ErrorCode::RemoteCommandFailed => ErrorKind::RemoteExecution,

            ErrorCode::RunUserAbort => ErrorKind::UserAbort,

            ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => ErrorKind::Internal,
        }
    }
}

/// Coarse error families. Only `Configuration`, `RemoteExecution` and
/// `UserAbort` are expected during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    RemoteExecution,
    UserAbort,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownEnvironmentDetails {
    pub environment: String,
    pub valid: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingTargetDetails {
    pub task: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

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
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAbortDetails {
    pub command: String,
    pub prompt: String,
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

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

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
            retryable: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn unknown_environment(name: impl Into<String>, valid: Vec<String>) -> Self {
        let name = name.into();
        let hint = format!("Valid environments: {}", valid.join(", "));
        Self::new(
            ErrorCode::ConfigUnknownEnvironment,
            format!("Unknown environment '{}'", name),
            to_details(UnknownEnvironmentDetails {
                environment: name,
                valid,
            }),
        )
        .with_hint(hint)
    }

    pub fn missing_target(task: impl Into<String>) -> Self {
        let task = task.into();
        Self::new(
            ErrorCode::ConfigMissingTarget,
            format!("Task '{}' needs a target host but no environment is selected", task),
            to_details(MissingTargetDetails { task }),
        )
        .with_hint("Put 'set-host:<environment>' before remote tasks, or pass --env <environment>")
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            to_details(ConfigMissingKeyDetails {
                key: key.into(),
                path,
            }),
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
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem,
            }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            problem.clone(),
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem,
                tried,
            }),
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let summary = details
            .stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| format!(": {}", line.trim()))
            .unwrap_or_default();
        let message = format!(
            "Command failed with exit code {}{}",
            details.exit_code, summary
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn user_abort(command: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::RunUserAbort,
            "Stopped execution per user request.",
            to_details(UserAbortDetails {
                command: command.into(),
                prompt: prompt.into(),
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

    /// Add a key to an object-shaped `details`.
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), to_details(value));
        }
        self
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Exit code of the failed command, when this error carries one.
    pub fn remote_exit_code(&self) -> Option<i32> {
        if self.code != ErrorCode::RemoteCommandFailed {
            return None;
        }
        self.details
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_environment_lists_valid_names() {
        let err = Error::unknown_environment(
            "staging",
            vec!["local".to_string(), "production".to_string()],
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.details["environment"], "staging");
        assert_eq!(err.details["valid"][1], "production");
        assert!(err.hints[0].message.contains("local, production"));
    }

    #[test]
    fn remote_failure_surfaces_last_stderr_line() {
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "git pull".to_string(),
            exit_code: 128,
            stdout: String::new(),
            stderr: "warning: x\nfatal: not a git repository\n".to_string(),
            target: None,
        });
        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        assert!(err.message.ends_with("fatal: not a git repository"));
        assert_eq!(err.remote_exit_code(), Some(128));
    }

    #[test]
    fn user_abort_has_its_own_kind() {
        let err = Error::user_abort("make test", "Tests failed. Continue anyway?");
        assert_eq!(err.kind(), ErrorKind::UserAbort);
        assert_eq!(err.code.as_str(), "run.user_abort");
        assert_eq!(err.remote_exit_code(), None);
    }
}
