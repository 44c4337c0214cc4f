//! Static run configuration: the project being deployed, the service names
//! the restart orchestrator drives, the environment table, and local checks.
//!
//! Configuration lives in one JSON file (camelCase keys). Everything is
//! resolved and validated once at load; the rest of the run only reads it.

use crate::environment::{self, Environment, Registry};
use crate::error::{Error, Result};
use crate::core::paths;
use crate::utils::shell::join_remote;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_SYSTEM_PACKAGES: &[&str] = &[
    "git-core",
    "python-dev",
    "nginx",
    "supervisor",
    "python-pip",
    "libmysqlclient-dev",
];

// ============================================================================
// On-disk schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub project: ProjectFile,
    #[serde(default)]
    pub services: Services,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentFile>,
    #[serde(default = "default_local_environment")]
    pub local_environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<LocalCheck>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_packages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFile {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
}

/// Names of the daemons the restart orchestrator drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Services {
    /// Reverse proxy, managed by the service manager.
    pub proxy: String,
    /// Application server program, managed by the process supervisor.
    pub app_server: String,
    /// Message broker, managed by the service manager.
    pub broker: String,
    /// Task worker program, managed by the process supervisor.
    pub task_worker: String,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            proxy: "nginx".to_string(),
            app_server: "gunicorn".to_string(),
            broker: "rabbitmq-server".to_string(),
            task_worker: "celeryd".to_string(),
        }
    }
}

/// A local command run through the failure confirmation gate by the `check` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCheck {
    pub command: String,
    #[serde(default)]
    pub message: String,
}

fn default_local_environment() -> String {
    "local".to_string()
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Remote paths derived from the project root and name. Constant for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPaths {
    pub root: String,
    pub project_dir: String,
    pub env_dir: String,
    pub requirements_file: String,
}

impl ProjectPaths {
    pub fn derive(root: &str, project_name: &str, requirements: &str) -> Self {
        let root = root.trim_end_matches('/').to_string();
        let project_dir = join_remote(&root, project_name);
        let env_dir = join_remote(&root, "env");
        let requirements_file = join_remote(&project_dir, requirements);
        Self {
            root,
            project_dir,
            env_dir,
            requirements_file,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub repository: String,
    pub settings_module: String,
    pub system_packages: Vec<String>,
    pub scripts_dir: String,
    pub site: String,
    pub entry_point: String,
    pub paths: ProjectPaths,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project: Project,
    pub services: Services,
    pub environments: Vec<Environment>,
    pub local_environment: String,
    pub local_user: Option<String>,
    pub checks: Vec<LocalCheck>,
}

impl Config {
    /// Environment registry over the configured environments.
    pub fn registry(&self) -> Registry<'_> {
        Registry::new(
            &self.environments,
            &self.local_environment,
            self.local_user.as_deref(),
        )
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load configuration from an explicit path, `ROADIE_CONFIG`, or the default location.
pub fn load(explicit: Option<&str>) -> Result<Config> {
    let path = paths::config_file(explicit)?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(
            Error::config_missing_key("config", Some(display.clone())).with_hint(format!(
                "Create {} or pass --config <file> (or set {})",
                display,
                paths::CONFIG_ENV_VAR
            )),
        );
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", display))))?;
    parse(&raw, &display)
}

/// Parse and resolve a JSON config document. `origin` names the source in errors.
pub fn parse(raw: &str, origin: &str) -> Result<Config> {
    let file: ConfigFile =
        serde_json::from_str(raw).map_err(|e| Error::config_invalid_json(origin, e))?;
    resolve(file, origin)
}

fn resolve(file: ConfigFile, origin: &str) -> Result<Config> {
    let project = resolve_project(file.project, origin)?;

    if file.environments.is_empty() {
        return Err(Error::config_missing_key(
            "environments",
            Some(origin.to_string()),
        ));
    }

    let mut environments = Vec::with_capacity(file.environments.len());
    for (name, env) in file.environments {
        if env.hosts.is_empty() {
            return Err(Error::config_invalid_value(
                format!("environments.{}.hosts", name),
                None,
                format!("environment '{}' has no hosts", name),
            ));
        }
        if env.user.trim().is_empty() {
            return Err(Error::config_invalid_value(
                format!("environments.{}.user", name),
                None,
                format!("environment '{}' has no login user", name),
            ));
        }
        for host in &env.hosts {
            environment::parse_host(host).map_err(|problem| {
                Error::config_invalid_value(
                    format!("environments.{}.hosts", name),
                    Some(host.clone()),
                    problem,
                )
            })?;
        }
        environments.push(Environment {
            name,
            hosts: env.hosts,
            user: env.user,
        });
    }

    for check in &file.checks {
        if check.command.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "checks",
                None,
                "check command must not be empty",
            ));
        }
    }

    Ok(Config {
        project,
        services: file.services,
        environments,
        local_environment: file.local_environment,
        local_user: file.local_user.filter(|u| !u.trim().is_empty()),
        checks: file.checks,
    })
}

fn resolve_project(project: ProjectFile, origin: &str) -> Result<Project> {
    let name = project.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::config_missing_key(
            "project.name",
            Some(origin.to_string()),
        ));
    }

    let repository = match (project.repository, project.git_user) {
        (Some(repo), _) if !repo.trim().is_empty() => repo,
        (_, Some(user)) if !user.trim().is_empty() => {
            format!("git@bitbucket.org:{}/{}.git", user.trim(), name)
        }
        _ => {
            return Err(Error::config_missing_key(
                "project.repository",
                Some(origin.to_string()),
            )
            .with_hint("Set project.repository, or project.gitUser for a Bitbucket remote"))
        }
    };

    let root = project
        .root
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| format!("/srv/{}", name));
    if !root.starts_with('/') {
        return Err(Error::config_invalid_value(
            "project.root",
            Some(root),
            "root must be an absolute remote path",
        ));
    }

    let requirements = project
        .requirements
        .unwrap_or_else(|| "requirements.txt".to_string());
    let paths = ProjectPaths::derive(&root, &name, &requirements);

    Ok(Project {
        repository,
        settings_module: project
            .settings_module
            .unwrap_or_else(|| format!("{}.settings.prod", name)),
        system_packages: project.system_packages.unwrap_or_else(|| {
            DEFAULT_SYSTEM_PACKAGES
                .iter()
                .map(|p| p.to_string())
                .collect()
        }),
        scripts_dir: project.scripts_dir.unwrap_or_else(|| "scripts".to_string()),
        site: project.site.unwrap_or_else(|| name.clone()),
        entry_point: project.entry_point.unwrap_or_else(|| "wsgi.py".to_string()),
        paths,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "project": { "name": "shop", "gitUser": "acme" },
        "environments": {
            "local": { "hosts": ["192.168.1.1"], "user": "localadmin" },
            "production": { "hosts": ["203.0.113.5:2222"], "user": "deploy" }
        }
    }"#;

    #[test]
    fn defaults_follow_project_name() {
        let config = parse(MINIMAL, "test").unwrap();
        let project = &config.project;
        assert_eq!(project.repository, "git@bitbucket.org:acme/shop.git");
        assert_eq!(project.settings_module, "shop.settings.prod");
        assert_eq!(project.site, "shop");
        assert_eq!(project.entry_point, "wsgi.py");
        assert_eq!(project.system_packages.len(), 6);
        assert_eq!(config.services, Services::default());
        assert_eq!(config.local_environment, "local");
    }

    #[test]
    fn paths_derive_from_root_and_name() {
        let config = parse(MINIMAL, "test").unwrap();
        let paths = &config.project.paths;
        assert_eq!(paths.root, "/srv/shop");
        assert_eq!(paths.project_dir, "/srv/shop/shop");
        assert_eq!(paths.env_dir, "/srv/shop/env");
        assert_eq!(paths.requirements_file, "/srv/shop/shop/requirements.txt");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let raw = r#"{
            "project": {
                "name": "shop",
                "repository": "git@example.com:acme/shop.git",
                "root": "/opt/shop/",
                "requirements": "reqs/prod.txt",
                "site": "shop.example.com"
            },
            "services": { "appServer": "uwsgi" },
            "environments": { "production": { "hosts": ["shop.example.com"], "user": "deploy" } },
            "localUser": "mattb"
        }"#;
        let config = parse(raw, "test").unwrap();
        assert_eq!(config.project.repository, "git@example.com:acme/shop.git");
        assert_eq!(config.project.paths.root, "/opt/shop");
        assert_eq!(
            config.project.paths.requirements_file,
            "/opt/shop/shop/reqs/prod.txt"
        );
        assert_eq!(config.services.app_server, "uwsgi");
        assert_eq!(config.services.proxy, "nginx");
        assert_eq!(config.local_user.as_deref(), Some("mattb"));
    }

    #[test]
    fn missing_repository_is_reported() {
        let raw = r#"{
            "project": { "name": "shop" },
            "environments": { "production": { "hosts": ["h"], "user": "u" } }
        }"#;
        let err = parse(raw, "test").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigMissingKey);
        assert_eq!(err.details["key"], "project.repository");
    }

    #[test]
    fn environment_without_hosts_is_rejected() {
        let raw = r#"{
            "project": { "name": "shop", "gitUser": "acme" },
            "environments": { "production": { "hosts": [], "user": "deploy" } }
        }"#;
        let err = parse(raw, "test").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "environments.production.hosts");
    }

    #[test]
    fn bad_port_is_rejected_at_load() {
        let raw = r#"{
            "project": { "name": "shop", "gitUser": "acme" },
            "environments": { "production": { "hosts": ["example.com:ssh"], "user": "deploy" } }
        }"#;
        let err = parse(raw, "test").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["value"], "example.com:ssh");
    }

    #[test]
    fn malformed_json_names_origin() {
        let err = parse("{ not json", "/etc/roadie.json").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalidJson);
        assert_eq!(err.details["path"], "/etc/roadie.json");
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load_from(file.path()).unwrap();
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.environments[0].name, "local");
    }

    #[test]
    fn load_from_missing_file_hints_at_location() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigMissingKey);
        assert!(!err.hints.is_empty());
    }
}
