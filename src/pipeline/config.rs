// src/pipeline/config.rs
use serde::Deserialize;
use std::path::Path;

use crate::classifier::DEFAULT_STATUS_PATTERN;
use crate::error::ConfigError;

/// Configuration for pipeline behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Regex locating the status code; see [`crate::Classifier::with_pattern`].
    pub status_pattern: String,
    pub error_strategy: ErrorStrategy,
    /// Read buffer for the input file.
    pub buffer_size: usize,
    pub max_line_length: usize,
    /// Buffered output bytes at which the sink asks the producer to pause.
    pub sink_high_water_mark: usize,
    pub open_mode: OpenMode,
    /// Log progress every N lines; 0 disables.
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            status_pattern: DEFAULT_STATUS_PATTERN.to_string(),
            error_strategy: ErrorStrategy::FailFast,
            buffer_size: 65536,          // 64KB
            max_line_length: 1048576,    // 1MB
            sink_high_water_mark: 16384, // 16KB
            open_mode: OpenMode::Append,
            progress_interval: 0, // Disabled
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::InvalidValue(
                "max_line_length must be greater than zero".to_string(),
            ));
        }
        if self.sink_high_water_mark == 0 {
            return Err(ConfigError::InvalidValue(
                "sink_high_water_mark must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do with lines longer than `max_line_length`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Count the line as skipped and keep streaming. The line is never
    /// classified, so an error line among the skipped ones is missing from
    /// the output.
    Skip,
    /// Stop the run on the first oversized line
    FailFast,
}

/// How the output file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Keep existing content and append after it
    Append,
    /// Start from an empty file
    Truncate,
}
