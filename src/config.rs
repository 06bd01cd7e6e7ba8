use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunError;
use crate::test_model::{FilterMode, Verbosity};

pub const CONFIG_FILE: &str = "teststream.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Executable that provides `test -json`
    pub runner: String,
    pub packages: Vec<String>,
    /// Extra arguments passed before the package list
    pub args: Vec<String>,
    pub replay_file: PathBuf,
    pub show: FilterMode,
    pub verbosity: Verbosity,
    /// Ring the terminal bell when the run completes
    pub alert: bool,
    /// Seed the progress estimate from the previous replay file
    pub seed_from_replay: bool,
    pub cover_profile: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// How long the final frame stays up before the view closes
    pub grace_period_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            runner: "go".to_string(),
            packages: vec!["./...".to_string()],
            args: Vec::new(),
            replay_file: PathBuf::from("test-output.json"),
            show: FilterMode::All,
            verbosity: Verbosity::Standard,
            alert: false,
            seed_from_replay: true,
            cover_profile: None,
            log_file: None,
            grace_period_ms: 500,
        }
    }
}

impl RunConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
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

    /// Load an explicit config file, or `teststream.toml` if present
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let run = &self.run;

        if run.runner.trim().is_empty() {
            return Err(RunError::Config("run.runner must not be empty".to_string()));
        }
        if run.packages.is_empty() {
            return Err(RunError::Config(
                "run.packages must name at least one package pattern".to_string(),
            ));
        }
        if run.replay_file.as_os_str().is_empty() {
            return Err(RunError::Config("run.replay_file must not be empty".to_string()));
        }

        Ok(())
    }
}
