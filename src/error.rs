// Fatal pipeline errors, plus the per-record parse failures aggregators absorb

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors surfaced by the aggregation pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid tuning parameter or unusable input path, raised before any worker starts
    #[error("configuration error: {0}")]
    Config(String),

    /// Read failure on the input file; aborts the run rather than returning partial results
    #[error("I/O failure on {path} while {operation}: {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A worker task panicked or was cancelled before reporting
    #[error("worker failed: {0}")]
    WorkerPanicked(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, operation: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// True for errors raised before the pipeline started
    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::WorkerPanicked(err.to_string())
    }
}

/// Per-line parse failure; always absorbed by the aggregator, never returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("missing ';' delimiter")]
    MissingDelimiter,
    #[error("empty station name")]
    EmptyKey,
    #[error("station name is not valid UTF-8")]
    InvalidKey,
    #[error("unparseable temperature value")]
    InvalidValue,
}
