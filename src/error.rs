// src/error.rs
use std::fmt;
use std::path::{Path, PathBuf};

use crate::pipeline::state::PipelineState;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to open input '{}': {source}", .path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Read error after line {line}: {source}")]
    SourceRead {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line} too long: {length} > {max_length}")]
    LineTooLong {
        line: u64,
        length: usize,
        max_length: usize,
    },

    #[error("Failed to open output '{}': {source}", .path.display())]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to '{}' failed after {committed_lines} committed lines: {source}", .path.display())]
    SinkWrite {
        path: PathBuf,
        committed_lines: u64,
        /// Bytes of an incomplete line the medium kept
        torn_bytes: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to '{}' issued while sink capacity is exhausted", .path.display())]
    SinkOverrun { path: PathBuf },

    #[error("Failed to commit '{}' to stable storage: {source}", .path.display())]
    SinkCommit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid status pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Status pattern '{0}' has no capture group")]
    MissingCaptureGroup(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// What a failed run left behind in the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    /// No byte from this run reached the output; the file is absent or unchanged.
    Untouched,
    /// Output from this run reached the file before the failure and stays there:
    /// `committed_lines` whole lines, followed by `torn_bytes` of a cut-off
    /// line when the medium could not take that fragment back.
    Partial {
        path: PathBuf,
        committed_lines: u64,
        torn_bytes: u64,
    },
}

impl OutputStatus {
    pub fn new(path: &Path, committed_lines: u64, torn_bytes: u64) -> Self {
        if committed_lines == 0 && torn_bytes == 0 {
            OutputStatus::Untouched
        } else {
            OutputStatus::Partial {
                path: path.to_path_buf(),
                committed_lines,
                torn_bytes,
            }
        }
    }
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStatus::Untouched => write!(f, "no output written"),
            OutputStatus::Partial {
                path,
                committed_lines,
                torn_bytes: 0,
            } => write!(
                f,
                "{} lines already committed to '{}'",
                committed_lines,
                path.display()
            ),
            OutputStatus::Partial {
                path,
                committed_lines,
                torn_bytes,
            } => write!(
                f,
                "{} lines already committed to '{}', followed by {} bytes of a torn line",
                committed_lines,
                path.display(),
                torn_bytes
            ),
        }
    }
}

/// Terminal result of a run that did not reach `Done`.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline {state}: {error} ({output})")]
pub struct RunError {
    #[source]
    pub error: ProcessingError,
    pub state: PipelineState,
    pub output: OutputStatus,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        self.state == PipelineState::Cancelled
    }

    /// True when the output file holds lines from this run.
    pub fn has_partial_output(&self) -> bool {
        matches!(self.output, OutputStatus::Partial { .. })
    }
}
