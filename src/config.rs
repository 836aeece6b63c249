//! Project configuration and environment overrides.
//!
//! `config.json` only carries defaults: start URLs, the driver command, and
//! wait budgets. Anything a run learns at runtime lives in the run store.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "DESIGNRUN_CONFIG";
pub const RUNS_DIR_ENV: &str = "DESIGN_RUNS_DIR";
pub const DRIVER_ENV: &str = "DESIGNRUN_DRIVER";
pub const LOG_ENV: &str = "DESIGNRUN_LOG";

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_RUNS_DIR: &str = "runs";
pub const DEFAULT_AURA_START_URL: &str = "https://www.aura.build/";
pub const DEFAULT_VARIANT_START_URL: &str = "https://variant.com/projects";

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub runs_dir: Option<PathBuf>,
    /// Shell-style command line for the browser driver process.
    pub driver_command: Option<String>,
    #[serde(alias = "chatgpt_url")]
    pub chat_url: Option<String>,
    pub aura_start_url: Option<String>,
    pub variant_start_url: Option<String>,
    pub timeouts: TimeoutConfig,
}

/// Wait budgets in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub chat_s: u64,
    pub aura_s: u64,
    pub variant_s: u64,
    pub reexport_s: u64,
    pub login_wait_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            chat_s: 180,
            aura_s: 150,
            variant_s: 300,
            reexport_s: 120,
            login_wait_s: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_s)
    }
}

/// Effective settings for one invocation after flags, env, and file are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub runs_dir: PathBuf,
    pub driver_command: Option<String>,
    pub project: ProjectConfig,
}

/// Flag values that take precedence over env and file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub runs_dir: Option<PathBuf>,
    pub driver: Option<String>,
}

impl Settings {
    /// Resolve settings from flags, then the process environment, then the file.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let config_path = pick_path(overrides.config.clone(), env_value(CONFIG_ENV))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let project = load_project_config(&config_path)?;
        Ok(Self::merge(
            overrides,
            project,
            env_value(RUNS_DIR_ENV),
            env_value(DRIVER_ENV),
        ))
    }

    fn merge(
        overrides: &Overrides,
        project: ProjectConfig,
        runs_dir_env: Option<String>,
        driver_env: Option<String>,
    ) -> Self {
        let runs_dir = pick_path(overrides.runs_dir.clone(), runs_dir_env)
            .or_else(|| project.runs_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNS_DIR));
        let driver_command = overrides
            .driver
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or(driver_env)
            .or_else(|| project.driver_command.clone());
        Self {
            runs_dir,
            driver_command,
            project,
        }
    }
}

/// Load `config.json`; a missing file yields defaults.
pub fn load_project_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no project config, using defaults");
        return Ok(ProjectConfig::default());
    }
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ProjectConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

fn pick_path(flag: Option<PathBuf>, env_value: Option<String>) -> Option<PathBuf> {
    flag.or_else(|| env_value.map(PathBuf::from))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_project_config(&dir.path().join("config.json")).expect("load");
        assert!(config.chat_url.is_none());
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn chatgpt_url_key_is_accepted_and_partial_timeouts_merge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"chatgpt_url": "https://chat.example/g/abc", "timeouts": {"variant_s": 42}}"#,
        )
        .expect("write config");
        let config = load_project_config(&path).expect("load");
        assert_eq!(config.chat_url.as_deref(), Some("https://chat.example/g/abc"));
        assert_eq!(config.timeouts.variant_s, 42);
        assert_eq!(config.timeouts.chat_s, 180);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write config");
        let err = load_project_config(&path).expect_err("malformed config");
        assert!(err.to_string().contains("parse config JSON"));
    }

    #[test]
    fn runs_dir_prefers_flag_then_env_then_file() {
        let project = ProjectConfig {
            runs_dir: Some(PathBuf::from("from-file")),
            ..ProjectConfig::default()
        };
        let flag = Overrides {
            runs_dir: Some(PathBuf::from("from-flag")),
            ..Overrides::default()
        };
        let settings = Settings::merge(&flag, project.clone(), Some("from-env".into()), None);
        assert_eq!(settings.runs_dir, PathBuf::from("from-flag"));

        let settings = Settings::merge(
            &Overrides::default(),
            project.clone(),
            Some("from-env".into()),
            None,
        );
        assert_eq!(settings.runs_dir, PathBuf::from("from-env"));

        let settings = Settings::merge(&Overrides::default(), project, None, None);
        assert_eq!(settings.runs_dir, PathBuf::from("from-file"));

        let settings = Settings::merge(&Overrides::default(), ProjectConfig::default(), None, None);
        assert_eq!(settings.runs_dir, PathBuf::from(DEFAULT_RUNS_DIR));
    }
}
