//! Remote command execution against the selected session target.
//!
//! A `RemoteCommand` is an opaque command string plus the modifiers a step
//! needs. Rendering applies them in a fixed order:
//! activation prefix, then working directory, then `sudo`.

use crate::environment::SessionTarget;
use crate::error::{Error, RemoteCommandFailedDetails, Result, TargetDetails};
use crate::ssh::{CommandOutput, RemoteShell, Transport};
use crate::utils::shell;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub command: String,
    /// Run inside the isolated interpreter environment.
    pub isolated: bool,
    /// Run through the agent-forwarded transport.
    pub forward_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub sudo: bool,
}

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            isolated: false,
            forward_credentials: false,
            cwd: None,
            sudo: false,
        }
    }

    /// Isolated commands always run credential-forwarded, like every other
    /// command that may reach back to the source host.
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self.forward_credentials = true;
        self
    }

    pub fn forwarded(mut self) -> Self {
        self.forward_credentials = true;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn transport(&self) -> Transport {
        if self.forward_credentials {
            Transport::AgentForwarded
        } else {
            Transport::Direct
        }
    }

    /// The exact string handed to the remote shell.
    pub fn render(&self, env_dir: &str) -> String {
        let mut rendered = if self.isolated {
            format!("source {}/bin/activate; {}", env_dir, self.command)
        } else {
            self.command.clone()
        };

        if let Some(dir) = &self.cwd {
            rendered = format!("cd {} && {}", dir, rendered);
        }

        // `-n`: fail rather than wait on a password prompt nobody can see.
        if self.sudo {
            rendered = format!("sudo -n sh -c {}", shell::escape_command_for_shell(&rendered));
        }

        rendered
    }
}

/// What `sudo -n` prints when the account has no passwordless sudo.
const SUDO_PASSWORD_REQUIRED: &str = "a password is required";

/// What ran and how it ended, as reported back to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl CommandRecord {
    pub fn new(command: &str, output: &CommandOutput) -> Self {
        Self {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        }
    }
}

/// The explicit per-run context every remote call is made in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub environment: String,
    pub target: SessionTarget,
    pub env_dir: String,
}

pub struct Executor<'a> {
    shell: &'a dyn RemoteShell,
    session: &'a Session,
}

impl<'a> Executor<'a> {
    pub fn new(shell: &'a dyn RemoteShell, session: &'a Session) -> Self {
        Self { shell, session }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn target(&self) -> &SessionTarget {
        &self.session.target
    }

    /// Run and return the raw outcome, whatever the exit code.
    pub fn run_unchecked(&self, command: &RemoteCommand) -> (String, CommandOutput) {
        let rendered = command.render(&self.session.env_dir);
        let transport = command.transport();
        log_status!(
            "run",
            "[{}]{} {}",
            self.session.target,
            if transport == Transport::AgentForwarded { " (agent)" } else { "" },
            rendered
        );
        let output = self
            .shell
            .execute(&self.session.target, &rendered, transport);
        (rendered, output)
    }

    /// Run and fail with a remote-command error on non-zero exit.
    pub fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        let (rendered, output) = self.run_unchecked(command);
        if output.success {
            Ok(output)
        } else {
            Err(self.failure(rendered, &output))
        }
    }

    pub fn failure(&self, rendered: String, output: &CommandOutput) -> Error {
        let target = &self.session.target;
        let needs_password = rendered.starts_with("sudo -n ")
            && output.stderr.contains(SUDO_PASSWORD_REQUIRED);
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            command: rendered,
            exit_code: output.exit_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            target: Some(TargetDetails {
                host: target.host.clone(),
                port: target.port,
                user: target.user.clone(),
            }),
        });

        if needs_password {
            err.with_hint(format!(
                "sudo on {} asked for a password. Grant '{}' passwordless sudo (NOPASSWD in sudoers) for provisioning commands",
                target.host, target.user
            ))
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::core::test_support::{session, RecordingShell};

    #[test]
    fn plain_command_is_unmodified() {
        let cmd = RemoteCommand::new("echo $HOME | tr a-z A-Z");
        assert_eq!(cmd.render("/srv/env"), "echo $HOME | tr a-z A-Z");
        assert_eq!(cmd.transport(), Transport::Direct);
    }

    #[test]
    fn isolated_command_gets_activation_prefix_and_agent() {
        let cmd = RemoteCommand::new("pip freeze").isolated();
        assert_eq!(cmd.render("/srv/env"), "source /srv/env/bin/activate; pip freeze");
        assert_eq!(cmd.transport(), Transport::AgentForwarded);
    }

    #[test]
    fn cwd_wraps_activation() {
        let cmd = RemoteCommand::new("python manage.py check")
            .isolated()
            .in_dir("/srv/app/app");
        assert_eq!(
            cmd.render("/srv/app/env"),
            "cd /srv/app/app && source /srv/app/env/bin/activate; python manage.py check"
        );
    }

    #[test]
    fn sudo_wraps_everything() {
        let cmd = RemoteCommand::new("cp scripts/*.conf /etc/supervisor/conf.d/.")
            .in_dir("/srv/app/app")
            .sudo();
        assert_eq!(
            cmd.render("/srv/app/env"),
            "sudo -n sh -c 'cd /srv/app/app && cp scripts/*.conf /etc/supervisor/conf.d/.'"
        );
    }

    #[test]
    fn run_passes_rendered_command_and_transport() {
        let shell = RecordingShell::new();
        let session = session();
        let exec = Executor::new(&shell, &session);
        exec.run(&RemoteCommand::new("git pull").forwarded()).unwrap();

        let calls = shell.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "git pull");
        assert_eq!(calls[0].transport, Transport::AgentForwarded);
        assert_eq!(calls[0].target, session.target);
    }

    #[test]
    fn sudo_never_prompts_and_hints_at_nopasswd() {
        let cmd = RemoteCommand::new("apt-get install -y nginx").sudo();
        assert_eq!(cmd.render("/srv/env"), "sudo -n sh -c 'apt-get install -y nginx'");
        assert_eq!(cmd.transport(), Transport::Direct);

        let shell = RecordingShell::new().fail_on("apt-get", 1, "sudo: a password is required\n");
        let session = session();
        let exec = Executor::new(&shell, &session);
        let err = exec.run(&cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        assert_eq!(err.hints.len(), 1);
        assert!(err.hints[0].message.contains("NOPASSWD"));
        assert!(err.hints[0].message.contains("'deploy'"));
    }

    #[test]
    fn other_sudo_failures_carry_no_password_hint() {
        let shell = RecordingShell::new().fail_on("service nginx reload", 1, "nginx: [emerg]");
        let session = session();
        let exec = Executor::new(&shell, &session);
        let err = exec
            .run(&RemoteCommand::new("service nginx reload").sudo())
            .unwrap_err();
        assert!(err.hints.is_empty());
    }

    #[test]
    fn non_zero_exit_is_remote_execution_error() {
        let shell = RecordingShell::new().fail_on("git pull", 1, "fatal: no remote");
        let session = session();
        let exec = Executor::new(&shell, &session);
        let err = exec.run(&RemoteCommand::new("git pull")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteExecution);
        assert_eq!(err.details["exitCode"], 1);
        assert_eq!(err.details["stderr"], "fatal: no remote");
        assert_eq!(err.details["target"]["host"], session.target.host);
    }
}
