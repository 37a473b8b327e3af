use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ObservabilityConfig;
use crate::errors::CollectorError;
use crate::logging::log_level::LogLevel;

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
    Pretty,
}

impl FromStr for OutputFormat {
    type Err = CollectorError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            "pretty" => Ok(OutputFormat::Pretty),
            _ => Err(CollectorError::Configuration(format!(
                "Invalid log format: {format}"
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: OutputFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: OutputFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Builds the logging setup from the observability section; unknown values fall back to defaults
    pub fn from_observability(config: &ObservabilityConfig) -> Self {
        let defaults = Self::default();
        Self {
            level: config.log_level.parse().unwrap_or(defaults.level),
            format: config.log_format.parse().unwrap_or(defaults.format),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}
