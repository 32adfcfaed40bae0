//! Error types for pipeline operations
//!
//! Hard failures fall into two families: missing inputs (a source file, a raw
//! partition or the fact table is absent) and invalid data (empty tables,
//! unparseable dates, missing columns). Both abort the run. Soft degradations
//! such as a missing product table never surface as errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A required input file or directory does not exist
    #[error("{what} not found: {path}")]
    NotFound { what: String, path: PathBuf },

    /// The partition base exists but holds no ingestion-date partitions
    #[error("No ingestion_date partitions under {0}")]
    NoPartitions(PathBuf),

    /// Source table has no data rows
    #[error("Source is empty: {0}")]
    EmptySource(PathBuf),

    /// A required date column holds a value that is not a calendar date
    #[error("Invalid {column} in {path} at row {row}: {value:?}")]
    InvalidDate {
        path: PathBuf,
        column: String,
        row: usize,
        value: String,
    },

    /// Required columns are absent from the source header
    #[error("Missing required columns in {path}: {}", .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    /// CSV decoding error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Embedded analytical engine error
    #[error("Engine error: {0}")]
    EngineError(String),

    /// Relational sink error
    #[error("SQLite error: {0}")]
    SqliteError(String),

    /// IO error with path context
    #[error("IO error with {path}: {message}")]
    IoErrorWithPath {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Create a not-found error for a named input
    pub fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io_with_path(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::IoErrorWithPath {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Whether this error reports a missing input
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound { .. } | PipelineError::NoPartitions(_)
        )
    }

    /// Whether this error reports a validation failure on source data
    pub fn is_invalid_data(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptySource(_)
                | PipelineError::InvalidDate { .. }
                | PipelineError::MissingColumns { .. }
        )
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ConfigError(msg) => {
                format!("Configuration error: {msg}\n\nHint: Check pipeline.toml.")
            }
            PipelineError::NotFound { .. } | PipelineError::NoPartitions(_) => {
                format!(
                    "{self}\n\nHint: Ensure the source files exist and earlier stages have run."
                )
            }
            PipelineError::EmptySource(_)
            | PipelineError::InvalidDate { .. }
            | PipelineError::MissingColumns { .. } => {
                format!("{self}\n\nHint: Fix the source file and re-run the pipeline.")
            }
            _ => self.to_string(),
        }
    }
}

impl From<duckdb::Error> for PipelineError {
    fn from(err: duckdb::Error) -> Self {
        PipelineError::EngineError(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::SqliteError(err.to_string())
    }
}
