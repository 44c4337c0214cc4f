use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable that points at an alternate config file.
pub const CONFIG_ENV_VAR: &str = "ROADIE_CONFIG";

/// Base roadie config directory (~/.config/roadie/ on Unix-like systems)
pub fn roadie() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("roadie"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("roadie"))
    }
}

/// Default roadie.json config file path
pub fn roadie_json() -> Result<PathBuf> {
    Ok(roadie()?.join("roadie.json"))
}

/// Resolve which config file to load.
///
/// An explicit path wins, then `ROADIE_CONFIG`, then the default location.
/// Leading `~` and `$VAR` references are expanded.
pub fn config_file(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return expand(path);
    }

    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return expand(&path);
        }
    }

    roadie_json()
}

fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).map_err(|e| {
        Error::config_invalid_value("config", Some(path.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = config_file(Some("/etc/roadie/site.json")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/roadie/site.json"));
    }

    #[cfg(not(windows))]
    #[test]
    fn default_path_lives_under_config_dir() {
        let path = roadie_json().unwrap();
        assert!(path.ends_with(".config/roadie/roadie.json"));
    }
}
