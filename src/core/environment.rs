//! Environment registry: named deployment targets and the session target
//! derived from them.

use crate::error::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    pub hosts: Vec<String>,
    pub user: String,
}

/// The host, port and login a command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTarget {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
}

impl SessionTarget {
    /// `host` or `host:port`, as it appears in configuration.
    pub fn host_string(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `user@host` destination for the ssh client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl std::fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.host_string())
    }
}

/// The selected environment and every target it resolves to.
///
/// The first target is the primary host; remote tasks address only it unless
/// the run iterates all hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub environment: String,
    pub targets: Vec<SessionTarget>,
}

impl Selection {
    /// `None` only for a selection built by hand with no targets.
    pub fn primary(&self) -> Option<&SessionTarget> {
        self.targets.first()
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(primary) = self.primary() else {
            return write!(f, "'{}' (no hosts)", self.environment);
        };
        write!(f, "'{}' -> {}", self.environment, primary)?;
        if self.targets.len() > 1 {
            write!(f, " (+{} more)", self.targets.len() - 1)?;
        }
        Ok(())
    }
}

/// Split a configured host string into host and optional port.
///
/// `host:port` yields a port; anything that is not exactly one `:` separated
/// pair (a bare host, an IPv6 literal) is used whole with no port.
pub fn parse_host(host: &str) -> std::result::Result<(String, Option<u16>), String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("host must not be empty".to_string());
    }

    let parts: Vec<&str> = host.split(':').collect();
    if parts.len() != 2 {
        return Ok((host.to_string(), None));
    }

    let (name, port) = (parts[0], parts[1]);
    if name.is_empty() {
        return Err(format!("host '{}' has an empty address", host));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("host '{}' has an invalid port '{}'", host, port))?;
    Ok((name.to_string(), Some(port)))
}

/// The operator's own login name, used for the local environment.
pub fn resolve_local_account(
    configured: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    if let Some(user) = configured.filter(|u| !u.trim().is_empty()) {
        return Some(user.to_string());
    }
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
}

pub struct Registry<'a> {
    environments: &'a [Environment],
    local_environment: &'a str,
    local_user: Option<&'a str>,
}

impl<'a> Registry<'a> {
    pub fn new(
        environments: &'a [Environment],
        local_environment: &'a str,
        local_user: Option<&'a str>,
    ) -> Self {
        Self {
            environments,
            local_environment,
            local_user,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.environments.iter().map(|e| e.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&'a Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Select an environment by name, reading the operator's account from
    /// the process environment.
    pub fn select(&self, name: &str) -> Result<Selection> {
        self.select_with(name, |var| std::env::var(var).ok())
    }

    pub fn select_with(
        &self,
        name: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Selection> {
        let env = self
            .get(name)
            .ok_or_else(|| Error::unknown_environment(name, self.names()))?;

        let user = if env.name == self.local_environment {
            resolve_local_account(self.local_user, lookup).ok_or_else(|| {
                Error::config_missing_key("localUser", None).with_hint(
                    "Set localUser in the config; USER and LOGNAME are not set",
                )
            })?
        } else {
            env.user.clone()
        };

        let mut targets = Vec::with_capacity(env.hosts.len());
        for host in &env.hosts {
            let (host, port) = parse_host(host).map_err(|problem| {
                Error::config_invalid_value(
                    format!("environments.{}.hosts", env.name),
                    Some(host.clone()),
                    problem,
                )
            })?;
            targets.push(SessionTarget {
                host,
                port,
                user: user.clone(),
            });
        }

        if targets.is_empty() {
            return Err(Error::config_invalid_value(
                format!("environments.{}.hosts", env.name),
                None,
                format!("environment '{}' has no hosts", env.name),
            ));
        }

        let selection = Selection {
            environment: env.name.clone(),
            targets,
        };
        log_status!("set-host", "Selected {}", selection);
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn environments() -> Vec<Environment> {
        vec![
            Environment {
                name: "local".to_string(),
                hosts: vec!["192.168.1.1".to_string()],
                user: "localadmin".to_string(),
            },
            Environment {
                name: "production".to_string(),
                hosts: vec![
                    "203.0.113.5:2222".to_string(),
                    "203.0.113.6".to_string(),
                ],
                user: "deploy".to_string(),
            },
        ]
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_host_splits_port() {
        assert_eq!(
            parse_host("203.0.113.5:2222").unwrap(),
            ("203.0.113.5".to_string(), Some(2222))
        );
        assert_eq!(
            parse_host("203.0.113.5").unwrap(),
            ("203.0.113.5".to_string(), None)
        );
    }

    #[test]
    fn parse_host_keeps_ipv6_whole() {
        assert_eq!(parse_host("::1").unwrap(), ("::1".to_string(), None));
    }

    #[test]
    fn parse_host_rejects_bad_port() {
        assert!(parse_host("example.com:99999").is_err());
        assert!(parse_host(":22").is_err());
        assert!(parse_host("  ").is_err());
    }

    #[test]
    fn select_unknown_environment_fails_with_valid_names() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", None);
        let err = registry.select_with("staging", no_env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.details["valid"], serde_json::json!(["local", "production"]));
    }

    #[test]
    fn select_resolves_all_hosts_first_is_primary() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", None);
        let selection = registry.select_with("production", no_env).unwrap();
        assert_eq!(selection.targets.len(), 2);
        assert_eq!(
            selection.primary(),
            Some(&SessionTarget {
                host: "203.0.113.5".to_string(),
                port: Some(2222),
                user: "deploy".to_string(),
            })
        );
        assert_eq!(selection.targets[1].port, None);
    }

    #[test]
    fn local_environment_uses_configured_local_user() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", Some("mattb"));
        let selection = registry
            .select_with("local", |_| Some("someone-else".to_string()))
            .unwrap();
        assert_eq!(selection.primary().unwrap().user, "mattb");
    }

    #[test]
    fn local_environment_falls_back_to_login_name() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", None);
        let selection = registry
            .select_with("local", |var| (var == "LOGNAME").then(|| "operator".to_string()))
            .unwrap();
        assert_eq!(selection.primary().unwrap().user, "operator");
    }

    #[test]
    fn local_environment_without_account_is_a_config_error() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", None);
        let err = registry.select_with("local", no_env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn non_local_environment_keeps_stored_user() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", Some("mattb"));
        let selection = registry.select_with("production", no_env).unwrap();
        assert_eq!(selection.primary().unwrap().user, "deploy");
    }

    #[test]
    fn target_display_includes_port() {
        let target = SessionTarget {
            host: "203.0.113.5".to_string(),
            port: Some(2222),
            user: "deploy".to_string(),
        };
        assert_eq!(target.to_string(), "deploy@203.0.113.5:2222");
        assert_eq!(target.destination(), "deploy@203.0.113.5");
    }

    #[test]
    fn selection_display_names_primary_and_extra_hosts() {
        let envs = environments();
        let registry = Registry::new(&envs, "local", None);
        let selection = registry.select_with("production", no_env).unwrap();
        assert_eq!(
            selection.to_string(),
            "'production' -> deploy@203.0.113.5:2222 (+1 more)"
        );
    }

    #[test]
    fn empty_selection_has_no_primary() {
        let selection = Selection {
            environment: "production".to_string(),
            targets: Vec::new(),
        };
        assert_eq!(selection.primary(), None);
        assert_eq!(selection.to_string(), "'production' (no hosts)");
    }
}
