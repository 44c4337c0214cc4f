use crate::core::paths;
use crate::environment::SessionTarget;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable that disables connection multiplexing on the direct path.
pub const DISABLE_MULTIPLEX_ENV: &str = "ROADIE_SSH_DISABLE_MULTIPLEX";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Stderr if it has content, otherwise stdout.
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// How a command reaches the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Batch-mode ssh over a multiplexed control connection.
    Direct,
    /// A fresh ssh process with `-A` so the remote session can use the
    /// operator's agent (e.g. to authenticate to a git server). Never
    /// multiplexed: a shared master opened without `-A` would drop the agent.
    AgentForwarded,
}

/// Executes an already-rendered command string on a target.
///
/// Implementations report failures through `CommandOutput`; turning a
/// non-zero exit into an error is the executor's job.
pub trait RemoteShell {
    fn execute(&self, target: &SessionTarget, command: &str, transport: Transport)
        -> CommandOutput;
}

pub struct SshClient {
    /// Directory for control sockets; `None` disables multiplexing.
    pub control_dir: Option<PathBuf>,
    pub connect_timeout_secs: u32,
    pub control_persist_secs: u32,
}

impl Default for SshClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SshClient {
    pub fn new() -> Self {
        let control_dir = if std::env::var_os(DISABLE_MULTIPLEX_ENV).is_some() {
            None
        } else {
            paths::roadie().ok().map(|dir| dir.join("ssh"))
        };

        Self {
            control_dir,
            connect_timeout_secs: 10,
            control_persist_secs: 60,
        }
    }

    fn control_path(&self, target: &SessionTarget) -> Option<PathBuf> {
        let dir = self.control_dir.as_ref()?;
        prepare_control_dir(dir).ok()?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        target.hash(&mut hasher);
        Some(dir.join(format!("ctl-{:x}", hasher.finish())))
    }

    /// Arguments for the direct path.
    pub fn direct_args(&self, target: &SessionTarget, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(port) = target.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        // Batch mode plus keepalives so a stalled connection fails instead of hanging
        // on a prompt. The remote command itself still has no timeout.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        if let Some(path) = self.control_path(target) {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPersist={}s", self.control_persist_secs),
                "-o".to_string(),
                format!("ControlPath={}", path.display()),
            ]);
        }

        args.push(target.destination());
        args.push(command.to_string());
        args
    }

    fn run_ssh(&self, args: &[String]) -> CommandOutput {
        match Command::new("ssh").args(args).output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("SSH error: {}", e),
                success: false,
                exit_code: -1,
            },
        }
    }
}

/// Create the control socket directory, or tighten an existing one, so only
/// the owner can reach the sockets.
fn prepare_control_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

/// Arguments for the agent-forwarded path:
/// `-p <port> -A <user>@<host> <command>`, or `-A <user>@<host> <command>`
/// when the target has no port.
pub fn forwarded_args(target: &SessionTarget, command: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(port) = target.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args.push("-A".to_string());
    args.push(target.destination());
    args.push(command.to_string());
    args
}

impl RemoteShell for SshClient {
    fn execute(
        &self,
        target: &SessionTarget,
        command: &str,
        transport: Transport,
    ) -> CommandOutput {
        let args = match transport {
            Transport::Direct => self.direct_args(target, command),
            Transport::AgentForwarded => forwarded_args(target, command),
        };
        self.run_ssh(&args)
    }
}

pub fn execute_local_command(command: &str) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput {
            stdout: String::new(),
            stderr: format!("Command error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}
