use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchoError {
    /// The caller broke an ordering or shape contract; the run must abort.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Input not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed file {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Inputs existed but nothing usable came out of them.
    #[error("No output produced: {0}")]
    EmptyResult(String),

    #[error("Unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl EchoError {
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EchoError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, EchoError::ContractViolation(_))
    }
}

impl From<tempfile::PersistError> for EchoError {
    fn from(err: tempfile::PersistError) -> Self {
        EchoError::Io(err.error)
    }
}

pub type Result<T> = std::result::Result<T, EchoError>;
