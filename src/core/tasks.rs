//! Task registry and chain runner.
//!
//! A run is a chain of `name[:arg]` tokens executed left to right. `set-host`
//! selects the environment for the tasks after it; every other task except
//! `check` needs a selection.

use crate::config::Config;
use crate::environment::Selection;
use crate::error::{Error, Result};
use crate::executor::{Executor, Session};
use crate::gate::{self, Confirm, GuardOutcome};
use crate::pipeline::{FailurePolicy, Provisioner, StepReport};
use crate::services::ServiceAction;
use crate::ssh::RemoteShell;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskArg {
    None,
    Optional(&'static str),
    Required(&'static str),
}

pub struct TaskInfo {
    pub name: &'static str,
    pub arg: TaskArg,
    pub about: &'static str,
}

pub const REGISTRY: &[TaskInfo] = &[
    TaskInfo {
        name: "set-host",
        arg: TaskArg::Required("environment"),
        about: "Select the target environment for the tasks that follow",
    },
    TaskInfo {
        name: "deploy",
        arg: TaskArg::None,
        about: "Provision and deploy: libraries, tree, environment, source, requirements, schema, static, config, restart",
    },
    TaskInfo {
        name: "collect-static",
        arg: TaskArg::None,
        about: "Collect static assets",
    },
    TaskInfo {
        name: "sync-db",
        arg: TaskArg::None,
        about: "Synchronize the database schema and apply migrations",
    },
    TaskInfo {
        name: "migrate",
        arg: TaskArg::Optional("app"),
        about: "Apply migrations, for one app or all",
    },
    TaskInfo {
        name: "switch-branch",
        arg: TaskArg::Required("branch"),
        about: "Check out a branch and restart services",
    },
    TaskInfo {
        name: "version",
        arg: TaskArg::None,
        about: "Show the last commit of the deployed checkout",
    },
    TaskInfo {
        name: "restart-gunicorn",
        arg: TaskArg::None,
        about: "Restart the application server",
    },
    TaskInfo {
        name: "restart-celery",
        arg: TaskArg::None,
        about: "Restart the task worker",
    },
    TaskInfo {
        name: "restart-rabbitmq",
        arg: TaskArg::None,
        about: "Restart the message broker",
    },
    TaskInfo {
        name: "reload-nginx",
        arg: TaskArg::None,
        about: "Reload the reverse proxy",
    },
    TaskInfo {
        name: "restart",
        arg: TaskArg::None,
        about: "Reload the proxy, then restart app server, broker and worker",
    },
    TaskInfo {
        name: "clone",
        arg: TaskArg::None,
        about: "Clone the repository unless the project directory exists",
    },
    TaskInfo {
        name: "update",
        arg: TaskArg::None,
        about: "Pull and update submodules",
    },
    TaskInfo {
        name: "setup-libs",
        arg: TaskArg::None,
        about: "Install system packages",
    },
    TaskInfo {
        name: "build-tree",
        arg: TaskArg::None,
        about: "Create the root directory unless it exists",
    },
    TaskInfo {
        name: "init-environment",
        arg: TaskArg::None,
        about: "Create the isolated interpreter environment unless it exists",
    },
    TaskInfo {
        name: "config",
        arg: TaskArg::None,
        about: "Install supervisor and nginx configuration",
    },
    TaskInfo {
        name: "update-reqs",
        arg: TaskArg::None,
        about: "Install application requirements",
    },
    TaskInfo {
        name: "check",
        arg: TaskArg::None,
        about: "Run the configured local checks",
    },
];

pub fn task_names() -> Vec<String> {
    REGISTRY.iter().map(|t| t.name.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SetHost(String),
    Deploy,
    CollectStatic,
    SyncDb,
    Migrate(Option<String>),
    SwitchBranch(String),
    Version,
    Service(ServiceAction),
    Restart,
    Clone,
    Update,
    SetupLibs,
    BuildTree,
    InitEnvironment,
    Config,
    UpdateReqs,
    Check,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::SetHost(_) => "set-host",
            Task::Deploy => "deploy",
            Task::CollectStatic => "collect-static",
            Task::SyncDb => "sync-db",
            Task::Migrate(_) => "migrate",
            Task::SwitchBranch(_) => "switch-branch",
            Task::Version => "version",
            Task::Service(action) => action.as_str(),
            Task::Restart => "restart",
            Task::Clone => "clone",
            Task::Update => "update",
            Task::SetupLibs => "setup-libs",
            Task::BuildTree => "build-tree",
            Task::InitEnvironment => "init-environment",
            Task::Config => "config",
            Task::UpdateReqs => "update-reqs",
            Task::Check => "check",
        }
    }

    pub fn arg(&self) -> Option<&str> {
        match self {
            Task::SetHost(a) | Task::SwitchBranch(a) => Some(a.as_str()),
            Task::Migrate(a) => a.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arg() {
            Some(arg) => write!(f, "{}:{}", self.name(), arg),
            None => f.write_str(self.name()),
        }
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };

        let info = REGISTRY.iter().find(|t| t.name == name).ok_or_else(|| {
            Error::validation_invalid_argument(
                "task",
                format!("Unknown task '{}'", name),
                Some(vec![token.to_string()]),
            )
            .with_hint(format!("Available tasks: {}", task_names().join(", ")))
        })?;

        let arg = arg.filter(|a| !a.is_empty()).map(str::to_string);
        let arg = match (info.arg, arg) {
            (TaskArg::None, Some(_)) => {
                return Err(Error::validation_invalid_argument(
                    "task",
                    format!("Task '{}' takes no argument", name),
                    Some(vec![token.to_string()]),
                ))
            }
            (TaskArg::Required(what), None) => {
                return Err(Error::validation_invalid_argument(
                    "task",
                    format!("Task '{}' requires an argument: {}:<{}>", name, name, what),
                    Some(vec![token.to_string()]),
                ))
            }
            (_, arg) => arg,
        };

        let required = || arg.clone().unwrap_or_default();
        Ok(match name {
            "set-host" => Task::SetHost(required()),
            "deploy" => Task::Deploy,
            "collect-static" => Task::CollectStatic,
            "sync-db" => Task::SyncDb,
            "migrate" => Task::Migrate(arg.clone()),
            "switch-branch" => Task::SwitchBranch(required()),
            "version" => Task::Version,
            "restart-gunicorn" => Task::Service(ServiceAction::RestartAppServer),
            "restart-celery" => Task::Service(ServiceAction::RestartTaskWorker),
            "restart-rabbitmq" => Task::Service(ServiceAction::RestartBroker),
            "reload-nginx" => Task::Service(ServiceAction::ReloadProxy),
            "restart" => Task::Restart,
            "clone" => Task::Clone,
            "update" => Task::Update,
            "setup-libs" => Task::SetupLibs,
            "build-tree" => Task::BuildTree,
            "init-environment" => Task::InitEnvironment,
            "config" => Task::Config,
            "update-reqs" => Task::UpdateReqs,
            "check" => Task::Check,
            other => {
                return Err(Error::internal_unexpected(format!(
                    "task '{}' is registered without a handler",
                    other
                )))
            }
        })
    }
}

/// Parse a task chain. `--env` is a leading `set-host`.
pub fn parse_chain(env: Option<&str>, tokens: &[String]) -> Result<Vec<Task>> {
    let mut chain = Vec::with_capacity(tokens.len() + 1);
    if let Some(env) = env {
        chain.push(Task::SetHost(env.to_string()));
    }
    for token in tokens {
        chain.push(token.parse()?);
    }
    if chain.is_empty() {
        return Err(Error::validation_invalid_argument(
            "task",
            "No task given",
            None,
        )
        .with_hint("Run with --list to see available tasks"));
    }
    Ok(chain)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run remote tasks on every host of the environment, one after another.
    pub all_hosts: bool,
    pub policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRun {
    pub target: String,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<GuardOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub tasks: Vec<TaskReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Runner<'a> {
    config: &'a Config,
    shell: &'a dyn RemoteShell,
    confirm: &'a mut dyn Confirm,
    options: RunOptions,
    selection: Option<Selection>,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        shell: &'a dyn RemoteShell,
        confirm: &'a mut dyn Confirm,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            shell,
            confirm,
            options,
            selection: None,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Run every task in order, stopping at the first error.
    pub fn run_chain(&mut self, chain: &[Task]) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut tasks = Vec::with_capacity(chain.len());
        for task in chain {
            tasks.push(self.run_task(task)?);
        }
        Ok(RunReport {
            environment: self.selection.as_ref().map(|s| s.environment.clone()),
            tasks,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub fn run_task(&mut self, task: &Task) -> Result<TaskReport> {
        let started_at = Utc::now();
        let mut report = TaskReport {
            task: task.to_string(),
            selection: None,
            hosts: Vec::new(),
            checks: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        match task {
            Task::SetHost(name) => {
                let selection = self.config.registry().select(name)?;
                report.selection = Some(selection.clone());
                self.selection = Some(selection);
            }
            Task::Check => {
                report.checks = gate::run_checks(&self.config.checks, &mut *self.confirm)?;
            }
            _ => {
                let selection = self
                    .selection
                    .clone()
                    .ok_or_else(|| Error::missing_target(task.to_string()))?;
                let primary = selection.primary().ok_or_else(|| {
                    Error::config_invalid_value(
                        format!("environments.{}.hosts", selection.environment),
                        None,
                        format!("environment '{}' has no hosts", selection.environment),
                    )
                })?;
                let targets = if self.options.all_hosts {
                    selection.targets.as_slice()
                } else {
                    std::slice::from_ref(primary)
                };
                for target in targets {
                    let session = Session {
                        environment: selection.environment.clone(),
                        target: target.clone(),
                        env_dir: self.config.project.paths.env_dir.clone(),
                    };
                    report.hosts.push(self.run_on(task, &session)?);
                }
            }
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    fn run_on(&mut self, task: &Task, session: &Session) -> Result<HostRun> {
        let config = self.config;
        let exec = Executor::new(self.shell, session);
        let mut provisioner = Provisioner::new(
            exec,
            &config.project,
            &config.services,
            self.options.policy,
            &mut *self.confirm,
        );

        let mut output = None;
        let steps = match task {
            Task::Deploy => provisioner.deploy()?,
            Task::CollectStatic => vec![provisioner.collect_static()?],
            Task::SyncDb => vec![provisioner.sync_db()?],
            Task::Migrate(app) => vec![provisioner.migrate(app.as_deref())?],
            Task::SwitchBranch(branch) => provisioner.switch_branch(branch)?,
            Task::Version => {
                let step = provisioner.version()?;
                output = step.commands.first().map(|c| c.stdout.trim().to_string());
                vec![step]
            }
            Task::Service(action) => vec![provisioner.service_action(*action)?],
            Task::Restart => vec![provisioner.restart()?],
            Task::Clone => vec![provisioner.clone_guarded()?],
            Task::Update => vec![provisioner.update()?],
            Task::SetupLibs => vec![provisioner.setup_libs()?],
            Task::BuildTree => vec![provisioner.build_tree()?],
            Task::InitEnvironment => vec![provisioner.init_environment()?],
            Task::Config => vec![provisioner.config()?],
            Task::UpdateReqs => vec![provisioner.update_reqs()?],
            Task::SetHost(_) | Task::Check => Vec::new(),
        };

        Ok(HostRun {
            target: session.target.to_string(),
            steps,
            output,
        })
    }
}
