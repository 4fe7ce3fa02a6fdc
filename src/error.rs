//! Error types for ODK analytics

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while condensing instances.
///
/// Data-quality and sequence anomalies inside a log are never errors; they are
/// reported as [`crate::diagnostics::Diagnostic`] values instead.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file pattern: {0}")]
    Pattern(String),

    #[error("Invalid form definition: {0}")]
    FormDefinition(String),

    #[error("Unable to find ODK instances directory: {}", .0.display())]
    InstancesDirNotFound(PathBuf),

    #[error("Header mismatch at {existing:?} (CSV) and {proposed:?} (new)")]
    SchemaMismatch {
        existing: Option<String>,
        proposed: Option<String>,
    },

    #[error("Expected exactly one {name} in {}, found {found}", .folder.display())]
    FileCount {
        folder: PathBuf,
        name: String,
        found: usize,
    },
}

impl From<glob::PatternError> for AnalyticsError {
    fn from(e: glob::PatternError) -> Self {
        AnalyticsError::Pattern(e.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AnalyticsError>;
