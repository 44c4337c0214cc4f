//! Fakes shared by the unit tests: a recording remote shell, a scripted
//! operator, and a small fixture configuration.

use crate::config::{self, Config};
use crate::environment::SessionTarget;
use crate::error::Result;
use crate::executor::Session;
use crate::gate::Confirm;
use crate::ssh::{CommandOutput, RemoteShell, Transport};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

pub const FIXTURE: &str = r#"{
    "project": {
        "name": "shop",
        "repository": "git@bitbucket.org:acme/shop.git",
        "site": "shop.example.com"
    },
    "environments": {
        "local": { "hosts": ["192.168.1.1"], "user": "localadmin" },
        "production": { "hosts": ["203.0.113.5:2222", "203.0.113.6"], "user": "deploy" }
    },
    "localUser": "mattb",
    "checks": [
        { "command": "exit 1", "message": "Tests failed. Continue anyway?" },
        { "command": "exit 2", "message": "" }
    ]
}"#;

pub fn fixture_config() -> Config {
    config::parse(FIXTURE, "fixture").unwrap()
}

pub fn session() -> Session {
    Session {
        environment: "production".to_string(),
        target: SessionTarget {
            host: "203.0.113.5".to_string(),
            port: Some(2222),
            user: "deploy".to_string(),
        },
        env_dir: "/srv/shop/env".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: SessionTarget,
    pub command: String,
    pub transport: Transport,
}

/// Records every command. `test -e '<path>'` succeeds for paths marked as
/// existing; commands containing a registered pattern fail.
#[derive(Default)]
pub struct RecordingShell {
    calls: RefCell<Vec<Call>>,
    existing: HashSet<String>,
    failures: Vec<(String, i32, String)>,
    stdout: Vec<(String, String)>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(mut self, paths: &[&str]) -> Self {
        self.existing.extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn fail_on(mut self, pattern: &str, exit_code: i32, stderr: &str) -> Self {
        self.failures
            .push((pattern.to_string(), exit_code, stderr.to_string()));
        self
    }

    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.stdout.push((pattern.to_string(), stdout.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.command.clone()).collect()
    }

    /// Commands other than existence probes.
    pub fn actions(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.starts_with("test -e "))
            .collect()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.commands().iter().any(|c| c.contains(fragment))
    }

    fn probe(&self, command: &str) -> Option<CommandOutput> {
        let path = command.strip_prefix("test -e '")?.strip_suffix('\'')?;
        let exists = self.existing.contains(path);
        Some(CommandOutput {
            success: exists,
            exit_code: if exists { 0 } else { 1 },
            ..Default::default()
        })
    }
}

impl RemoteShell for RecordingShell {
    fn execute(
        &self,
        target: &SessionTarget,
        command: &str,
        transport: Transport,
    ) -> CommandOutput {
        self.calls.borrow_mut().push(Call {
            target: target.clone(),
            command: command.to_string(),
            transport,
        });

        if let Some((_, exit_code, stderr)) = self
            .failures
            .iter()
            .find(|(pattern, _, _)| command.contains(pattern.as_str()))
        {
            return CommandOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
                success: false,
                exit_code: *exit_code,
            };
        }

        if let Some(output) = self.probe(command) {
            return output;
        }

        let stdout = self
            .stdout
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        CommandOutput {
            stdout,
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }
}

/// Answers confirmation prompts from a script and records the questions.
#[derive(Default)]
pub struct ScriptedConfirm {
    answers: VecDeque<bool>,
    pub asked: Vec<String>,
}

impl ScriptedConfirm {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            asked: Vec::new(),
        }
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&mut self, message: &str) -> Result<bool> {
        self.asked.push(message.to_string());
        Ok(self.answers.pop_front().unwrap_or(false))
    }
}
