// ABOUTME: Configuration management for the thunkflow application
// ABOUTME: Handles loading configuration from files and applying environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Config::default(),
        };

        config.merge_env()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Working directory first, then the home directory.
    fn find_config_file() -> Option<PathBuf> {
        let local = [
            "thunkflow.yaml",
            "thunkflow.yml",
            ".thunkflow.yaml",
            ".thunkflow.yml",
        ];

        if let Some(path) = local.iter().map(PathBuf::from).find(|p| p.exists()) {
            return Some(path);
        }

        dirs::home_dir()
            .map(|home| home.join(".thunkflow").join("config.yaml"))
            .filter(|p| p.exists())
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("THUNKFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("THUNKFLOW_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(max) = std::env::var("THUNKFLOW_MAX_WORKFLOWS") {
            self.engine.max_concurrent_workflows = max
                .parse()
                .context("THUNKFLOW_MAX_WORKFLOWS must be a positive integer")?;
        }
        if let Ok(max) = std::env::var("THUNKFLOW_MAX_STEPS") {
            self.engine.max_concurrent_steps = max
                .parse()
                .context("THUNKFLOW_MAX_STEPS must be a positive integer")?;
        }

        Ok(())
    }
}
