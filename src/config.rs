use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Component type name the processor registers under.
pub const TYPE_STR: &str = "securityevent";

/// Result statuses accepted in `status_filter`.
pub const VALID_STATUSES: [&str; 4] = ["pass", "fail", "error", "skip"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid status in status_filter: {0}. Valid values are: pass, fail, error, skip")]
    InvalidStatus(String),
}

/// Top-level processor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub processors: ProcessorConfig,
}

/// Per-format sub-processor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub openreports: OpenReportsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenReportsConfig {
    pub enabled: bool,
    /// Only results whose status is listed here become security events.
    /// Empty means every status is kept.
    pub status_filter: Vec<String>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document is the default config.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.processors.openreports.validate()
    }
}

impl OpenReportsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for status in &self.status_filter {
            if !VALID_STATUSES.contains(&status.as_str()) {
                return Err(ConfigError::InvalidStatus(status.clone()));
            }
        }
        Ok(())
    }
}
