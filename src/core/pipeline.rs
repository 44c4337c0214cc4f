//! The provisioning pipeline.
//!
//! Steps run in a fixed order against one session target. A step is either
//! executed or skipped; nothing is rolled back. Steps that create the root
//! tree, the isolated environment, or the checkout are guarded by an
//! existence probe; the rest rely on the idempotence of the tools they call.

use crate::config::{Project, Services};
use crate::error::{ErrorKind, Result};
use crate::executor::{CommandRecord, Executor, RemoteCommand};
use crate::gate::{self, Confirm};
use crate::probe;
use crate::services::{self, RestartReport, ServiceAction};
use crate::ssh::CommandOutput;
use serde::Serialize;

const NGINX_AVAILABLE: &str = "/etc/nginx/sites-available";
const NGINX_DEFAULT_SITE: &str = "/etc/nginx/sites-enabled/default";
const SUPERVISOR_CONF_DIR: &str = "/etc/supervisor/conf.d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ran,
    Skipped,
    /// Failed, and the operator chose to go on.
    Continued,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartReport>,
}

impl StepReport {
    fn skipped(step: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log_status!("deploy", "Skipping {}: {}", step, reason);
        Self {
            step: step.to_string(),
            status: StepStatus::Skipped,
            reason: Some(reason),
            commands: Vec::new(),
            restart: None,
        }
    }
}

/// What to do when a step's command exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The failure ends the run.
    #[default]
    Abort,
    /// Ask the operator through the failure confirmation gate.
    Confirm,
}

/// Commands issued by one step and the failure that ended it, if any.
struct StepRun {
    step: &'static str,
    commands: Vec<CommandRecord>,
    failed: Option<(String, CommandOutput)>,
}

impl StepRun {
    fn new(step: &'static str) -> Self {
        log_status!("deploy", "{}", step);
        Self {
            step,
            commands: Vec::new(),
            failed: None,
        }
    }

    fn report(self, status: StepStatus) -> StepReport {
        StepReport {
            step: self.step.to_string(),
            status,
            reason: None,
            commands: self.commands,
            restart: None,
        }
    }
}

pub struct Provisioner<'a> {
    exec: Executor<'a>,
    project: &'a Project,
    services: &'a Services,
    policy: FailurePolicy,
    confirm: &'a mut dyn Confirm,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        exec: Executor<'a>,
        project: &'a Project,
        services: &'a Services,
        policy: FailurePolicy,
        confirm: &'a mut dyn Confirm,
    ) -> Self {
        Self {
            exec,
            project,
            services,
            policy,
            confirm,
        }
    }

    /// Full pipeline: libraries, tree, environment, source, dependencies,
    /// schema, static assets, service configuration, restart.
    pub fn deploy(&mut self) -> Result<Vec<StepReport>> {
        let mut steps = vec![
            self.setup_libs()?,
            self.build_tree()?,
            self.init_environment()?,
        ];
        steps.extend(self.sync_source()?);
        steps.push(self.update_reqs()?);
        steps.push(self.sync_db()?);
        steps.push(self.collect_static()?);
        steps.push(self.config()?);
        steps.push(self.restart()?);
        log_status!("deploy", "Done on {}", self.exec.target());
        Ok(steps)
    }

    fn sh(&self, run: &mut StepRun, command: RemoteCommand) -> Result<CommandOutput> {
        let (rendered, output) = self.exec.run_unchecked(&command);
        run.commands.push(CommandRecord::new(&rendered, &output));
        if output.success {
            Ok(output)
        } else {
            let err = self.exec.failure(rendered.clone(), &output);
            run.failed = Some((rendered, output));
            Err(err)
        }
    }

    fn finish(&mut self, run: StepRun, result: Result<()>) -> Result<StepReport> {
        let err = match result {
            Ok(()) => return Ok(run.report(StepStatus::Ran)),
            Err(err) => err,
        };

        if self.policy == FailurePolicy::Confirm && err.kind() == ErrorKind::RemoteExecution {
            if let Some((rendered, output)) = &run.failed {
                let question = format!(
                    "Step '{}' failed on {}. Continue anyway?",
                    run.step,
                    self.exec.target()
                );
                gate::check(rendered, output, &question, &mut *self.confirm)?;
                return Ok(run.report(StepStatus::Continued));
            }
        }

        Err(err)
    }

    /// Install system libraries. Always runs.
    pub fn setup_libs(&mut self) -> Result<StepReport> {
        let mut run = StepRun::new("setup-libs");
        let packages = self.project.system_packages.join(" ");
        let result = self
            .sh(
                &mut run,
                RemoteCommand::new(format!("apt-get install -y {}", packages)).sudo(),
            )
            .map(drop);
        self.finish(run, result)
    }

    /// Create the root directory owned by the login user, unless it exists.
    pub fn build_tree(&mut self) -> Result<StepReport> {
        let project = self.project;
        let root = &project.paths.root;
        if probe::exists(&self.exec, root)? {
            return Ok(StepReport::skipped("build-tree", format!("{} exists", root)));
        }

        let mut run = StepRun::new("build-tree");
        let user = self.exec.target().user.clone();
        let result = self
            .sh(&mut run, RemoteCommand::new(format!("mkdir {}", root)).sudo())
            .and_then(|_| {
                self.sh(
                    &mut run,
                    RemoteCommand::new(format!("chown {0}:{0} {1}", user, root)).sudo(),
                )
            })
            .map(drop);
        self.finish(run, result)
    }

    /// Install the environment manager, then create the isolated environment
    /// unless it exists.
    pub fn init_environment(&mut self) -> Result<StepReport> {
        let project = self.project;
        let paths = &project.paths;
        let mut run = StepRun::new("init-environment");
        let result = self
            .sh(
                &mut run,
                RemoteCommand::new("pip install virtualenv")
                    .in_dir(paths.root.as_str())
                    .sudo(),
            )
            .and_then(|_| probe::exists(&self.exec, &paths.env_dir))
            .and_then(|exists| {
                if exists {
                    log_status!("deploy", "Environment {} exists", paths.env_dir);
                    Ok(())
                } else {
                    self.sh(
                        &mut run,
                        RemoteCommand::new("virtualenv env").in_dir(paths.root.as_str()),
                    )
                    .map(drop)
                }
            });
        self.finish(run, result)
    }

    /// Clone or update, decided by one probe of the project directory.
    /// Exactly one of the two reports has status other than skipped.
    pub fn sync_source(&mut self) -> Result<Vec<StepReport>> {
        let project = self.project;
        let project_dir = &project.paths.project_dir;
        if probe::exists(&self.exec, project_dir)? {
            Ok(vec![
                StepReport::skipped("clone", format!("{} exists", project_dir)),
                self.update()?,
            ])
        } else {
            Ok(vec![
                self.clone_repo()?,
                StepReport::skipped("update", "repository was just cloned"),
            ])
        }
    }

    /// Clone the repository unless the project directory already exists.
    pub fn clone_guarded(&mut self) -> Result<StepReport> {
        let project = self.project;
        let project_dir = &project.paths.project_dir;
        if probe::exists(&self.exec, project_dir)? {
            return Ok(StepReport::skipped("clone", format!("{} exists", project_dir)));
        }
        self.clone_repo()
    }

    fn clone_repo(&mut self) -> Result<StepReport> {
        let mut run = StepRun::new("clone");
        let command = RemoteCommand::new(format!(
            "git clone --recursive {}",
            self.project.repository
        ))
        .in_dir(self.project.paths.root.as_str())
        .forwarded();
        let result = self.sh(&mut run, command).map(drop);
        self.finish(run, result)
    }

    /// Pull and update submodules in the project directory.
    pub fn update(&mut self) -> Result<StepReport> {
        let project = self.project;
        let project_dir = project.paths.project_dir.as_str();
        let mut run = StepRun::new("update");
        let result = self
            .sh(
                &mut run,
                RemoteCommand::new("git pull").in_dir(project_dir).forwarded(),
            )
            .and_then(|_| {
                self.sh(
                    &mut run,
                    RemoteCommand::new("git submodule update --recursive")
                        .in_dir(project_dir)
                        .forwarded(),
                )
            })
            .map(drop);
        self.finish(run, result)
    }

    /// Install application dependencies from the manifest.
    pub fn update_reqs(&mut self) -> Result<StepReport> {
        let mut run = StepRun::new("update-reqs");
        let command = RemoteCommand::new(format!(
            "yes w | pip install -r {}",
            self.project.paths.requirements_file
        ))
        .isolated();
        let result = self.sh(&mut run, command).map(drop);
        self.finish(run, result)
    }

    /// Schema synchronization including pending migrations.
    pub fn sync_db(&mut self) -> Result<StepReport> {
        let command = format!(
            "python manage.py syncdb --settings={} --migrate --noinput",
            self.project.settings_module
        );
        self.manage("sync-db", command)
    }

    /// Apply migrations for one app, or site-wide when `app` is `None`.
    pub fn migrate(&mut self, app: Option<&str>) -> Result<StepReport> {
        let target = app.map(|a| format!(" {}", a)).unwrap_or_default();
        let command = format!(
            "python manage.py migrate{} --noinput --settings={}",
            target, self.project.settings_module
        );
        self.manage("migrate", command)
    }

    pub fn collect_static(&mut self) -> Result<StepReport> {
        let command = format!(
            "python manage.py collectstatic -l --noinput --settings={}",
            self.project.settings_module
        );
        self.manage("collect-static", command)
    }

    fn manage(&mut self, step: &'static str, command: String) -> Result<StepReport> {
        let mut run = StepRun::new(step);
        let command = RemoteCommand::new(command)
            .isolated()
            .in_dir(self.project.paths.project_dir.as_str());
        let result = self.sh(&mut run, command).map(drop);
        self.finish(run, result)
    }

    /// Install supervisor and nginx configuration from the checkout.
    pub fn config(&mut self) -> Result<StepReport> {
        let project = self.project;
        let scripts = project.scripts_dir.trim_end_matches('/');
        let mut run = StepRun::new("config");

        let result = probe::exists(&self.exec, NGINX_DEFAULT_SITE)
            .and_then(|has_default| {
                if has_default {
                    self.sh(
                        &mut run,
                        RemoteCommand::new(format!("rm {}", NGINX_DEFAULT_SITE)).sudo(),
                    )
                    .map(drop)
                } else {
                    Ok(())
                }
            })
            .and_then(|_| {
                self.sh(
                    &mut run,
                    RemoteCommand::new(format!(
                        "cp {}/*.conf {}/.",
                        scripts, SUPERVISOR_CONF_DIR
                    ))
                    .in_dir(project.paths.project_dir.as_str())
                    .sudo(),
                )
            })
            .and_then(|_| {
                self.sh(
                    &mut run,
                    RemoteCommand::new(format!(
                        "cp {}/{} {}/.",
                        scripts, project.site, NGINX_AVAILABLE
                    ))
                    .in_dir(project.paths.project_dir.as_str())
                    .sudo(),
                )
            })
            .and_then(|_| {
                self.sh(
                    &mut run,
                    RemoteCommand::new(format!(
                        "ln -s {}/{} {}",
                        NGINX_AVAILABLE, project.site, NGINX_DEFAULT_SITE
                    ))
                    .in_dir(project.paths.project_dir.as_str())
                    .sudo(),
                )
            })
            .map(drop);

        self.finish(run, result)
    }

    /// Check out a branch in the project directory, then restart services.
    pub fn switch_branch(&mut self, branch: &str) -> Result<Vec<StepReport>> {
        let mut run = StepRun::new("switch-branch");
        let command = RemoteCommand::new(format!("git checkout {}", branch))
            .isolated()
            .in_dir(self.project.paths.project_dir.as_str());
        let result = self.sh(&mut run, command).map(drop);
        let switched = self.finish(run, result)?;
        Ok(vec![switched, self.restart()?])
    }

    /// Last commit of the deployed checkout.
    pub fn version(&mut self) -> Result<StepReport> {
        let mut run = StepRun::new("version");
        let command = RemoteCommand::new("git log -1")
            .in_dir(self.project.paths.project_dir.as_str())
            .forwarded();
        let result = self.sh(&mut run, command).map(drop);
        self.finish(run, result)
    }

    /// All four service actions in order. Fails after all were attempted
    /// if any of them failed; the error covers every failed action.
    pub fn restart(&mut self) -> Result<StepReport> {
        let report = services::restart_all(&self.exec, self.services, self.project);
        let failure = report.error();
        let failed_output = report.failed_output();
        let failed_names: Vec<&str> = report
            .failed_actions()
            .iter()
            .map(|f| f.action.as_str())
            .collect();
        let mut step = StepReport {
            step: "restart".to_string(),
            status: StepStatus::Ran,
            reason: None,
            commands: Vec::new(),
            restart: None,
        };

        let Some(err) = failure else {
            step.restart = Some(report);
            return Ok(step);
        };

        if let (FailurePolicy::Confirm, Some((command, output))) = (self.policy, failed_output) {
            let question = format!(
                "Step 'restart' failed on {} ({}). Continue anyway?",
                self.exec.target(),
                failed_names.join(", ")
            );
            gate::check(&command, &output, &question, &mut *self.confirm)?;
            step.status = StepStatus::Continued;
            step.restart = Some(report);
            return Ok(step);
        }

        Err(err)
    }

    /// One service action, as a standalone step.
    pub fn service_action(&mut self, action: ServiceAction) -> Result<StepReport> {
        let mut run = StepRun::new(action.as_str());
        let report = services::run_action(&self.exec, action, self.services, self.project);
        run.commands = report.commands;
        let result = match report.failure {
            Some(err) => {
                if let Some(last) = run.commands.last() {
                    run.failed = Some((
                        last.command.clone(),
                        CommandOutput {
                            stdout: last.stdout.clone(),
                            stderr: last.stderr.clone(),
                            success: false,
                            exit_code: last.exit_code,
                        },
                    ));
                }
                Err(err)
            }
            None => Ok(()),
        };
        self.finish(run, result)
    }
}
