//! taskrelay configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ExecutionMode;
use crate::events::{BusConfig, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE, DEFAULT_HISTORY_SIZE, DEFAULT_WORKERS};
use crate::executor::{DEFAULT_AGENT_TYPES, TimeoutConfig};
use crate::orchestrator::{DEFAULT_MAX_CONCURRENCY, OrchestratorConfig};

/// Main taskrelay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent types, prompts, and timeouts
    pub agents: AgentsConfig,

    /// Batch execution defaults
    pub execution: ExecutionConfig,

    /// Event bus tuning
    pub events: EventsConfig,

    /// Which runner executes tasks
    pub runner: RunnerConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.agents.default_timeout_ms == 0 {
            return Err(eyre!("agents.default-timeout-ms must be greater than zero"));
        }
        if let Some((agent, _)) = self.agents.timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(eyre!("agents.timeouts-ms.{} must be greater than zero", agent));
        }
        if self.execution.max_concurrency == 0 {
            return Err(eyre!("execution.max-concurrency must be greater than zero"));
        }
        if self.events.buffer_size == 0 {
            return Err(eyre!("events.buffer-size must be greater than zero"));
        }
        if self.events.workers == 0 {
            return Err(eyre!("events.workers must be greater than zero"));
        }
        if !self.runner.mock && self.runner.command.is_none() {
            return Err(eyre!("runner.command is required unless runner.mock is enabled"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load_file_chain(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskrelay.yml
        let local_config = PathBuf::from(".taskrelay.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskrelay/taskrelay.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskrelay").join("taskrelay.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply TASKRELAY_* environment variables on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TASKRELAY_PROMPT_DIR") {
            tracing::debug!(%dir, "Config: TASKRELAY_PROMPT_DIR override");
            self.agents.prompt_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse::<usize>("TASKRELAY_MAX_CONCURRENCY") {
            self.execution.max_concurrency = n;
        }
        if let Some(n) = env_parse::<usize>("TASKRELAY_BUFFER_SIZE") {
            self.events.buffer_size = n;
        }
        if let Some(n) = env_parse::<u64>("TASKRELAY_DEFAULT_TIMEOUT_MS") {
            self.agents.default_timeout_ms = n;
        }
        if let Ok(mock) = std::env::var("TASKRELAY_MOCK") {
            self.runner.mock = matches!(mock.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            buffer_size: self.events.buffer_size,
            workers: self.events.workers,
            batch_size: self.events.batch_size,
            ..Default::default()
        }
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::from_millis(self.agents.default_timeout_ms, &self.agents.timeouts_ms)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.execution.max_concurrency,
            default_mode: self.execution.default_mode,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(%name, %value, "Config: ignoring unparseable environment override");
            None
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Directory holding `<agent-type>.md` prompt files
    #[serde(rename = "prompt-dir")]
    pub prompt_dir: PathBuf,

    /// Accepted agent types
    #[serde(rename = "known-types")]
    pub known_types: Vec<String>,

    /// Timeout for agents without an override, in milliseconds
    #[serde(rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,

    /// Per-agent timeout overrides, in milliseconds
    #[serde(rename = "timeouts-ms")]
    pub timeouts_ms: HashMap<String, u64>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let prompt_dir = dirs::config_dir()
            .map(|d| d.join("taskrelay").join("agents"))
            .unwrap_or_else(|| PathBuf::from(".taskrelay/agents"));

        Self {
            prompt_dir,
            known_types: DEFAULT_AGENT_TYPES.iter().map(|s| s.to_string()).collect(),
            default_timeout_ms: 120_000,
            timeouts_ms: HashMap::new(),
        }
    }
}

/// Batch execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum tasks running at once in parallel mode
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// sequential or parallel
    #[serde(rename = "default-mode")]
    pub default_mode: ExecutionMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_mode: ExecutionMode::Sequential,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Async event buffer capacity
    #[serde(rename = "buffer-size")]
    pub buffer_size: usize,

    /// Dispatch workers
    pub workers: usize,

    /// Events a worker handles per pass
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Events kept in the in-memory history
    #[serde(rename = "history-size")]
    pub history_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

/// Runner selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Simulate execution instead of running a command
    pub mock: bool,

    /// Simulated execution time in mock mode
    #[serde(rename = "mock-delay-ms")]
    pub mock_delay_ms: u64,

    /// Program that executes tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to the program
    pub args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mock: true,
            mock_delay_ms: 100,
            command: None,
            args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.agents.default_timeout_ms, 120_000);
        assert_eq!(config.agents.known_types.len(), 4);
        assert_eq!(config.execution.max_concurrency, 5);
        assert_eq!(config.execution.default_mode, ExecutionMode::Sequential);
        assert_eq!(config.events.buffer_size, 10_000);
        assert_eq!(config.events.workers, 4);
        assert_eq!(config.events.batch_size, 100);
        assert!(config.runner.mock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
agents:
  prompt-dir: /opt/agents
  known-types: [code-implementer, doc-writer]
  default-timeout-ms: 60000
  timeouts-ms:
    doc-writer: 5000

execution:
  max-concurrency: 8
  default-mode: parallel

events:
  buffer-size: 4096
  workers: 2
  batch-size: 50
  history-size: 200

runner:
  mock: false
  command: agent-cli
  args: [--json]

log-level: DEBUG
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.agents.prompt_dir, PathBuf::from("/opt/agents"));
        assert_eq!(config.agents.known_types, vec!["code-implementer", "doc-writer"]);
        assert_eq!(config.agents.timeouts_ms["doc-writer"], 5000);
        assert_eq!(config.execution.max_concurrency, 8);
        assert_eq!(config.execution.default_mode, ExecutionMode::Parallel);
        assert_eq!(config.events.history_size, 200);
        assert_eq!(config.runner.command.as_deref(), Some("agent-cli"));
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert!(config.validate().is_ok());

        let timeouts = config.timeout_config();
        assert_eq!(timeouts.for_agent("doc-writer").as_millis(), 5000);
        assert_eq!(timeouts.for_agent("code-implementer").as_millis(), 60000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
execution:
  max-concurrency: 2
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.execution.max_concurrency, 2);
        assert_eq!(config.execution.default_mode, ExecutionMode::Sequential);
        assert_eq!(config.events.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.agents.default_timeout_ms, 120_000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.execution.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agents.timeouts_ms.insert("sprint-planner".to_string(), 0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sprint-planner"));
    }

    #[test]
    fn test_validate_requires_command_without_mock() {
        let mut config = Config::default();
        config.runner.mock = false;
        assert!(config.validate().is_err());

        config.runner.command = Some("agent-cli".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskrelay.yml");
        fs::write(&path, "events:\n  workers: 1\nlog-level: WARN\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.events.workers, 1);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("WARN"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/taskrelay.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with other env-mutating tests
        unsafe {
            std::env::set_var("TASKRELAY_MAX_CONCURRENCY", "11");
            std::env::set_var("TASKRELAY_MOCK", "false");
            std::env::set_var("TASKRELAY_BUFFER_SIZE", "not-a-number");
        }

        let mut config = Config::default();
        config.apply_env_overrides();

        unsafe {
            std::env::remove_var("TASKRELAY_MAX_CONCURRENCY");
            std::env::remove_var("TASKRELAY_MOCK");
            std::env::remove_var("TASKRELAY_BUFFER_SIZE");
        }

        assert_eq!(config.execution.max_concurrency, 11);
        assert!(!config.runner.mock);
        assert_eq!(config.events.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_derived_configs() {
        let config = Config::default();
        assert_eq!(config.bus_config().buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.orchestrator_config().max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }
}
