//! Config resolution: CLI → env → working dir → XDG → defaults.

use crate::settings::{ConfigError, SyncConfig};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "FUNDSNAP_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fundsnap.toml";

const CONFIG_DIR_NAME: &str = "fundsnap";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    WorkingDir(PathBuf),
    UserConfigDir(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Cli(p) => write!(f, "cli:{}", p.display()),
            ConfigSource::Env(p) => write!(f, "env:{}", p.display()),
            ConfigSource::WorkingDir(p) => write!(f, "cwd:{}", p.display()),
            ConfigSource::UserConfigDir(p) => write!(f, "user:{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// Resolve configuration using the process environment.
pub fn resolve_config(cli_path: Option<&Path>) -> Result<(SyncConfig, ConfigSource), ConfigError> {
    let user_file = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("config.toml"));
    resolve_config_with_env(
        cli_path,
        Path::new("."),
        user_file.as_deref(),
        |key| std::env::var(key).ok(),
    )
}

/// Resolve configuration with injectable lookups.
///
/// An explicitly named file (CLI or env) must exist; implicit locations are
/// skipped when absent. Field-level env overrides apply last.
pub fn resolve_config_with_env<F>(
    cli_path: Option<&Path>,
    working_dir: &Path,
    user_file: Option<&Path>,
    env: F,
) -> Result<(SyncConfig, ConfigSource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, source) = if let Some(path) = cli_path {
        (SyncConfig::from_file(path)?, ConfigSource::Cli(path.to_path_buf()))
    } else if let Some(path) = env(CONFIG_ENV).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(path);
        (SyncConfig::from_file(&path)?, ConfigSource::Env(path))
    } else {
        let local = working_dir.join(LOCAL_CONFIG_FILE);
        if local.is_file() {
            (SyncConfig::from_file(&local)?, ConfigSource::WorkingDir(local))
        } else if let Some(user) = user_file.filter(|p| p.is_file()) {
            (
                SyncConfig::from_file(user)?,
                ConfigSource::UserConfigDir(user.to_path_buf()),
            )
        } else {
            (SyncConfig::default(), ConfigSource::Defaults)
        }
    };

    apply_env_overrides(&mut config, &env);
    config.validate()?;
    Ok((config, source))
}

fn apply_env_overrides<F>(config: &mut SyncConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = env("FUNDSNAP_SNAPSHOT_PATH").filter(|v| !v.is_empty()) {
        config.snapshot_path = PathBuf::from(path);
    }
    if let Some(dir) = env("FUNDSNAP_LOG_DIR").filter(|v| !v.is_empty()) {
        config.logging.dir = PathBuf::from(dir);
    }
    if let Some(project) = env("FUNDSNAP_PROJECT_ID").filter(|v| !v.is_empty()) {
        config.warehouse.project_id = project;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let (config, source) = resolve_config_with_env(None, dir.path(), None, no_env).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn working_dir_file_is_picked_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(LOCAL_CONFIG_FILE),
            "snapshot_path = \"local.parquet\"\n",
        )
        .unwrap();
        let (config, source) = resolve_config_with_env(None, dir.path(), None, no_env).unwrap();
        assert!(matches!(source, ConfigSource::WorkingDir(_)));
        assert_eq!(config.snapshot_path, PathBuf::from("local.parquet"));
    }

    #[test]
    fn cli_path_wins_over_env() {
        let dir = TempDir::new().unwrap();
        let cli = dir.path().join("cli.toml");
        let from_env = dir.path().join("env.toml");
        std::fs::write(&cli, "snapshot_path = \"cli.parquet\"\n").unwrap();
        std::fs::write(&from_env, "snapshot_path = \"env.parquet\"\n").unwrap();
        let env_path = from_env.display().to_string();
        let env = move |k: &str| (k == CONFIG_ENV).then(|| env_path.clone());

        let (config, source) =
            resolve_config_with_env(Some(&cli), dir.path(), None, env).unwrap();
        assert_eq!(source, ConfigSource::Cli(cli));
        assert_eq!(config.snapshot_path, PathBuf::from("cli.parquet"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(resolve_config_with_env(Some(&missing), dir.path(), None, no_env).is_err());
    }

    #[test]
    fn field_overrides_apply_last() {
        let dir = TempDir::new().unwrap();
        let vars: HashMap<&str, &str> = [
            ("FUNDSNAP_SNAPSHOT_PATH", "/mnt/share/funding.parquet"),
            ("FUNDSNAP_PROJECT_ID", "analytics-prod"),
        ]
        .into_iter()
        .collect();
        let env = |k: &str| vars.get(k).map(|v| v.to_string());

        let (config, _) = resolve_config_with_env(None, dir.path(), None, env).unwrap();
        assert_eq!(
            config.snapshot_path,
            PathBuf::from("/mnt/share/funding.parquet")
        );
        assert_eq!(config.warehouse.project_id, "analytics-prod");
    }
}
