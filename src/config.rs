use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "flow.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub workspace: Workspace,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Deserialize)]
pub struct Workspace {
    pub name: String,
    /// Workspace root, relative to the config file (default: its directory)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Namespace used when a reference does not name one
    #[serde(default)]
    pub namespace: String,
    /// Timeout for executables that do not set one, e.g. "30m"
    #[serde(default)]
    pub default_timeout: Option<String>,
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_interactive() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            default_timeout: None,
            interactive: default_interactive(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Find the nearest config file in `start` or one of its parents.
    pub fn discover(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    fn validate(&self) -> Result<()> {
        if self.workspace.name.trim().is_empty() {
            anyhow::bail!("Workspace name must not be empty");
        }
        if self.workspace.name.contains(['/', ':', ' ']) {
            anyhow::bail!(
                "Workspace name '{}' must not contain '/', ':' or spaces",
                self.workspace.name
            );
        }
        self.default_timeout()?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Result<Option<Duration>> {
        self.runner
            .default_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw)
                    .with_context(|| format!("Invalid default_timeout '{}'", raw))
            })
            .transpose()
    }

    /// Workspace root for a config file located in `config_dir`.
    pub fn workspace_path(&self, config_dir: &Path) -> PathBuf {
        match &self.workspace.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.to_path_buf(),
        }
    }
}
