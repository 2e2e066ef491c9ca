//! Typed configuration record loaded once at startup.
//!
//! Replaces the teacher's single YAML deploy-config with a small INI record
//! (spec §6), loaded from the files named there in increasing priority
//! order via `configparser`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use configparser::ini::Ini;

use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_LOCKS_DIR, DEFAULT_LOGS_DIR, DEFAULT_PROJECTS_DIR,
};

type IniMap = HashMap<String, HashMap<String, Option<String>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub logs_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub jails_remove_recursive: bool,
    pub jails_remove_force: bool,
    pub commands_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logs_dir: expand_home(DEFAULT_LOGS_DIR),
            projects_dir: expand_home(DEFAULT_PROJECTS_DIR),
            locks_dir: PathBuf::from(DEFAULT_LOCKS_DIR),
            jails_remove_recursive: false,
            jails_remove_force: true,
            commands_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration following spec §6's load order: the install
    /// prefix file, the user file, `DIRECTOR_CONFIG`, then `--config`.
    /// Later files override earlier ones key-by-key. `env_config` and
    /// `cli_config`, if given, must point at existing files; the first two
    /// are skipped silently when absent.
    pub fn load(
        prefix_file: Option<&Path>,
        user_file: Option<&Path>,
        env_config: Option<&Path>,
        cli_config: Option<&Path>,
    ) -> Result<Self> {
        let mut merged: IniMap = HashMap::new();

        if let Some(path) = prefix_file {
            merge_optional(&mut merged, path)?;
        }

        if let Some(path) = user_file {
            merge_optional(&mut merged, path)?;
        }

        if let Some(path) = env_config {
            merge_required(&mut merged, path, "DIRECTOR_CONFIG")?;
        }

        if let Some(path) = cli_config {
            merge_required(&mut merged, path, "--config")?;
        }

        Ok(Self::from_map(&merged))
    }

    fn from_map(map: &IniMap) -> Self {
        let defaults = Config::default();

        Config {
            logs_dir: get_path(map, "logs", "directory").unwrap_or(defaults.logs_dir),
            projects_dir: get_path(map, "projects", "directory").unwrap_or(defaults.projects_dir),
            locks_dir: get_path(map, "locks", "directory").unwrap_or(defaults.locks_dir),
            jails_remove_recursive: get_bool(map, "jails", "remove_recursive")
                .unwrap_or(defaults.jails_remove_recursive),
            jails_remove_force: get_bool(map, "jails", "remove_force")
                .unwrap_or(defaults.jails_remove_force),
            commands_timeout: get_u64(map, "commands", "timeout")
                .unwrap_or(defaults.commands_timeout),
        }
    }
}

fn merge_optional(merged: &mut IniMap, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Ok(());
    }

    merge_required(merged, path, "configuration file")
}

fn merge_required(merged: &mut IniMap, path: &Path, label: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{label}: {} does not exist", path.display());
    }

    let mut ini = Ini::new();
    let loaded = ini
        .load(path)
        .map_err(|err| anyhow::anyhow!(err))
        .with_context(|| format!("failed to parse {}", path.display()))?;

    for (section, keys) in loaded {
        let entry = merged.entry(section).or_default();

        for (key, value) in keys {
            entry.insert(key, value);
        }
    }

    Ok(())
}

fn get_str<'a>(map: &'a IniMap, section: &str, key: &str) -> Option<&'a str> {
    map.get(section)?.get(key)?.as_deref()
}

fn get_path(map: &IniMap, section: &str, key: &str) -> Option<PathBuf> {
    get_str(map, section, key).map(expand_home)
}

fn get_bool(map: &IniMap, section: &str, key: &str) -> Option<bool> {
    match get_str(map, section, key)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn get_u64(map: &IniMap, section: &str, key: &str) -> Option<u64> {
    get_str(map, section, key)?.parse().ok()
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(rest);
        }
    }

    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_files() {
        let config = Config::load(None, None, None, None).unwrap();
        assert_eq!(config.commands_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(config.jails_remove_force);
        assert!(!config.jails_remove_recursive);
    }

    #[test]
    fn later_file_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();

        let prefix_path = dir.path().join("prefix.ini");
        let mut prefix = std::fs::File::create(&prefix_path).unwrap();
        writeln!(prefix, "[commands]\ntimeout = 60\n").unwrap();

        let user_path = dir.path().join("user.ini");
        let mut user = std::fs::File::create(&user_path).unwrap();
        writeln!(user, "[commands]\ntimeout = 120\n").unwrap();

        let config = Config::load(Some(&prefix_path), Some(&user_path), None, None).unwrap();
        assert_eq!(config.commands_timeout, 120);
    }

    #[test]
    fn cli_config_must_exist() {
        let result = Config::load(None, None, None, Some(Path::new("/does/not/exist.ini")));
        assert!(result.is_err());
    }
}
