//! Failure confirmation gate: the one place the operator is asked mid-run.
//!
//! A guarded command may fail without raising. If it fails and a question is
//! supplied, the operator decides: "yes" continues, "no" aborts the run.

use crate::config::LocalCheck;
use crate::error::{Error, Result};
use crate::ssh::{execute_local_command, CommandOutput};
use serde::Serialize;

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&mut self, message: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// Not recognised; ask again.
    Unclear,
}

/// Interpret one line of operator input. `None` is end of input.
///
/// An empty line takes the default, which is yes.
pub fn parse_answer(input: Option<&str>) -> Answer {
    let Some(line) = input else {
        return Answer::No;
    };
    match line.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Answer::Yes,
        "n" | "no" => Answer::No,
        _ => Answer::Unclear,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardOutcome {
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// The command failed and the run went on anyway.
    pub continued: bool,
}

/// Run `command` locally and apply the gate to its outcome.
pub fn guard(command: &str, message: &str, confirm: &mut dyn Confirm) -> Result<GuardOutcome> {
    log_status!("local", "{}", command);
    let output = execute_local_command(command);
    check(command, &output, message, confirm)
}

/// Apply the gate to an outcome that has already been produced.
pub fn check(
    command: &str,
    output: &CommandOutput,
    message: &str,
    confirm: &mut dyn Confirm,
) -> Result<GuardOutcome> {
    let outcome = GuardOutcome {
        command: command.to_string(),
        success: output.success,
        exit_code: output.exit_code,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
        continued: !output.success,
    };

    if output.success || message.trim().is_empty() {
        return Ok(outcome);
    }

    let error_text = output.error_text().trim();
    if !error_text.is_empty() {
        eprintln!("{}", error_text);
    }
    eprintln!("Command '{}' exited with code {}", command, output.exit_code);

    if confirm.confirm(message)? {
        Ok(outcome)
    } else {
        Err(Error::user_abort(command, message))
    }
}

/// Run the configured local checks in order, each through the gate.
pub fn run_checks(checks: &[LocalCheck], confirm: &mut dyn Confirm) -> Result<Vec<GuardOutcome>> {
    checks
        .iter()
        .map(|c| guard(&c.command, &c.message, confirm))
        .collect()
}
