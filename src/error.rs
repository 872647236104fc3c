use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One entry per cycle, each listing the keys on it in traversal order
    #[error("Dependency cycle detected: {}", format_cycles(.0))]
    DependencyCycle(Vec<Vec<String>>),

    #[error("Duplicate change key with different content: {0}")]
    DuplicateChange(String),

    #[error("Conditional change not found: {0}")]
    MissingConditionalChange(String),

    #[error("No action for change {key}: expected {expected}, actual {actual}")]
    UnknownAction {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Change {key} failed on {}: {source}", .path.display())]
    ChangeFailed {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No USB Device Controller (UDC) found")]
    NoUdc,
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
