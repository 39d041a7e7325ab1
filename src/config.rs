//! Configuration loader and validator for the sticker-pack publisher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub pipeline: Pipeline,
    pub remover: Remover,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub api_base: String,
}

/// Image pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    /// Longest edge of a published sticker.
    pub max_dimension: u32,
    /// Encoded payload budget per sticker.
    pub size_budget_kb: u32,
    pub quality_start: u8,
    pub quality_step: u8,
    pub quality_floor: u8,
}

/// Background remover settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remover {
    pub command: String,
    pub model: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.telegram.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.api_base must be non-empty"));
    }

    if cfg.pipeline.max_dimension == 0 {
        return Err(ConfigError::Invalid("pipeline.max_dimension must be > 0"));
    }
    if cfg.pipeline.size_budget_kb == 0 {
        return Err(ConfigError::Invalid("pipeline.size_budget_kb must be > 0"));
    }
    if cfg.pipeline.quality_start == 0 || cfg.pipeline.quality_start > 100 {
        return Err(ConfigError::Invalid(
            "pipeline.quality_start must be in 1..=100",
        ));
    }
    if cfg.pipeline.quality_step == 0 {
        return Err(ConfigError::Invalid("pipeline.quality_step must be > 0"));
    }
    if cfg.pipeline.quality_floor == 0 {
        return Err(ConfigError::Invalid("pipeline.quality_floor must be > 0"));
    }
    if cfg.pipeline.quality_floor >= cfg.pipeline.quality_start {
        return Err(ConfigError::Invalid(
            "pipeline.quality_floor must be below pipeline.quality_start",
        ));
    }

    if cfg.remover.command.trim().is_empty() {
        return Err(ConfigError::Invalid("remover.command must be non-empty"));
    }
    if cfg.remover.model.trim().is_empty() {
        return Err(ConfigError::Invalid("remover.model must be non-empty"));
    }

    Ok(())
}

/// Example configuration, also used as the test fixture.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  api_base: "https://api.telegram.org"

pipeline:
  max_dimension: 512
  size_budget_kb: 490
  quality_start: 95
  quality_step: 5
  quality_floor: 10

remover:
  command: "rembg"
  model: "u2net"
"#
}
