//! Service restart orchestration.
//!
//! Four actions in a fixed order: reload the reverse proxy, restart the
//! application server, restart the message broker, restart the task worker.
//! Every action is attempted even when an earlier one failed.

use crate::config::{Project, Services};
use crate::error::{Error, Result};
use crate::executor::{CommandRecord, Executor, RemoteCommand};
use crate::ssh::CommandOutput;
use crate::utils::shell::join_remote;
use serde::Serialize;

/// Named after the CLI tasks that run them on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceAction {
    #[serde(rename = "reload-nginx")]
    ReloadProxy,
    #[serde(rename = "restart-gunicorn")]
    RestartAppServer,
    #[serde(rename = "restart-rabbitmq")]
    RestartBroker,
    #[serde(rename = "restart-celery")]
    RestartTaskWorker,
}

impl ServiceAction {
    /// Restart order for the full bounce.
    pub const ORDER: [ServiceAction; 4] = [
        ServiceAction::ReloadProxy,
        ServiceAction::RestartAppServer,
        ServiceAction::RestartBroker,
        ServiceAction::RestartTaskWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::ReloadProxy => "reload-nginx",
            ServiceAction::RestartAppServer => "restart-gunicorn",
            ServiceAction::RestartBroker => "restart-rabbitmq",
            ServiceAction::RestartTaskWorker => "restart-celery",
        }
    }

    pub fn service<'s>(&self, services: &'s Services) -> &'s str {
        match self {
            ServiceAction::ReloadProxy => &services.proxy,
            ServiceAction::RestartAppServer => &services.app_server,
            ServiceAction::RestartBroker => &services.broker,
            ServiceAction::RestartTaskWorker => &services.task_worker,
        }
    }

    pub fn commands(&self, services: &Services, project: &Project) -> Vec<RemoteCommand> {
        let service = self.service(services);
        match self {
            ServiceAction::ReloadProxy => {
                vec![RemoteCommand::new(format!("service {} reload", service)).sudo()]
            }
            ServiceAction::RestartAppServer => vec![
                RemoteCommand::new(format!("supervisorctl restart {}", service)).sudo(),
                // File-watching process managers reload on the entry point's mtime.
                RemoteCommand::new(format!(
                    "touch {}",
                    join_remote(&project.paths.project_dir, &project.entry_point)
                )),
            ],
            ServiceAction::RestartBroker => {
                vec![RemoteCommand::new(format!("service {} restart", service)).sudo()]
            }
            ServiceAction::RestartTaskWorker => {
                vec![RemoteCommand::new(format!("supervisorctl restart {}", service)).sudo()]
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub action: ServiceAction,
    pub service: String,
    pub success: bool,
    pub commands: Vec<CommandRecord>,
    #[serde(skip)]
    pub failure: Option<Error>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartReport {
    pub actions: Vec<ActionReport>,
}

impl RestartReport {
    pub fn all_succeeded(&self) -> bool {
        self.actions.iter().all(|a| a.success)
    }

    pub fn first_failure(&self) -> Option<&Error> {
        self.actions.iter().find_map(|a| a.failure.as_ref())
    }

    /// Every failed action with the command that ended it.
    pub fn failed_actions(&self) -> Vec<FailedAction> {
        self.actions
            .iter()
            .filter(|a| !a.success)
            .filter_map(|a| {
                let last = a.commands.last()?;
                Some(FailedAction {
                    action: a.action,
                    service: a.service.clone(),
                    command: last.command.clone(),
                    exit_code: last.exit_code,
                    stderr: last.stderr.clone(),
                })
            })
            .collect()
    }

    pub fn succeeded(&self) -> Vec<ServiceAction> {
        self.actions
            .iter()
            .filter(|a| a.success)
            .map(|a| a.action)
            .collect()
    }

    /// One error for the whole bounce. Details keep the first failure's
    /// command, exit code and output, plus `failures` and `succeeded`.
    pub fn error(&self) -> Option<Error> {
        let first = self.first_failure()?;
        let failed = self.failed_actions();

        let message = if failed.len() > 1 {
            let summary: Vec<String> = failed
                .iter()
                .map(|f| format!("{} (exit {})", f.action.as_str(), f.exit_code))
                .collect();
            format!(
                "{} of {} service actions failed: {}",
                failed.len(),
                self.actions.len(),
                summary.join(", ")
            )
        } else {
            first.message.clone()
        };

        let mut err = Error::new(first.code, message, first.details.clone())
            .with_detail("failures", &failed)
            .with_detail("succeeded", self.succeeded());
        for hint in self.actions.iter().filter_map(|a| a.failure.as_ref()).flat_map(|e| &e.hints) {
            if !err.hints.iter().any(|h| h.message == hint.message) {
                err = err.with_hint(hint.message.clone());
            }
        }
        Some(err)
    }

    /// Failed commands and their stderr folded into one outcome, each line
    /// tagged with its action.
    pub fn failed_output(&self) -> Option<(String, CommandOutput)> {
        let failed = self.failed_actions();
        let first = failed.first()?;
        let command = failed
            .iter()
            .map(|f| f.command.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let stderr = failed
            .iter()
            .map(|f| format!("[{}] {}", f.action.as_str(), f.stderr.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        Some((
            command,
            CommandOutput {
                stdout: String::new(),
                stderr,
                success: false,
                exit_code: first.exit_code,
            },
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAction {
    pub action: ServiceAction,
    pub service: String,
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// Run one action. Commands inside an action stop at the first failure.
pub fn run_action(
    exec: &Executor,
    action: ServiceAction,
    services: &Services,
    project: &Project,
) -> ActionReport {
    log_status!(
        "restart",
        "{} ({})",
        action.as_str(),
        action.service(services)
    );

    let mut report = ActionReport {
        action,
        service: action.service(services).to_string(),
        success: true,
        commands: Vec::new(),
        failure: None,
    };

    for command in action.commands(services, project) {
        let (rendered, output) = exec.run_unchecked(&command);
        report.commands.push(CommandRecord::new(&rendered, &output));
        if !output.success {
            report.success = false;
            report.failure = Some(exec.failure(rendered, &output));
            break;
        }
    }

    report
}

/// Run one action and turn a failure into an error.
pub fn run_single(
    exec: &Executor,
    action: ServiceAction,
    services: &Services,
    project: &Project,
) -> Result<ActionReport> {
    let report = run_action(exec, action, services, project);
    match report.failure.clone() {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

/// Run all four actions in order, regardless of individual failures.
pub fn restart_all(exec: &Executor, services: &Services, project: &Project) -> RestartReport {
    let actions = ServiceAction::ORDER
        .iter()
        .map(|action| run_action(exec, *action, services, project))
        .collect::<Vec<_>>();

    let report = RestartReport { actions };
    if !report.all_succeeded() {
        let failed: Vec<&str> = report
            .actions
            .iter()
            .filter(|a| !a.success)
            .map(|a| a.action.as_str())
            .collect();
        log_status!("restart", "Failed: {}", failed.join(", "));
    }
    report
}
