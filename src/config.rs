use eyre::{Context, Result};
use ledgerloop::runner::{RetryBackoff, RunnerOptions};
use ledgerloop::session::RunMode;
use ledgerloop::termination::TerminationOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    #[serde(rename = "loop")]
    pub run: LoopConfig,
    pub agent: AgentConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: Option<u32>,
    pub max_retries: u32,
    pub wait_for_quota: bool,
    pub delay_between_sessions_ms: u64,
    pub backoff: BackoffKind,
    pub max_backoff_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_retries: 3,
            wait_for_quota: false,
            delay_between_sessions_ms: 5000,
            backoff: BackoffKind::Fixed,
            max_backoff_ms: 300000,
        }
    }
}

impl LoopConfig {
    pub fn runner_options(&self, mode: RunMode) -> RunnerOptions {
        let retry_backoff = match self.backoff {
            BackoffKind::Fixed => RetryBackoff::Fixed,
            BackoffKind::Exponential => RetryBackoff::Exponential {
                max: Duration::from_millis(self.max_backoff_ms),
            },
        };
        RunnerOptions {
            mode,
            termination: TerminationOptions {
                max_iterations: self.max_iterations,
                max_retries: self.max_retries,
                wait_for_quota: self.wait_for_quota,
            },
            delay_between_sessions: Duration::from_millis(self.delay_between_sessions_ms),
            retry_backoff,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Instruction texts by name, layered over the built-in ones
    pub instructions: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            working_dir: None,
            instructions: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ledger.json"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            run: LoopConfig::default(),
            agent: AgentConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
