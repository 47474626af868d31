//! Error types for qn-core

use thiserror::Error;

/// Qn analysis error type
#[derive(Error, Debug)]
pub enum Error {
    /// Containers or flow vectors with incompatible structure were combined.
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    /// Explicit multi-index access outside an axis.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Named axis does not exist in the container.
    #[error("Axis not found: {0}")]
    AxisNotFound(String),

    /// Invalid configuration or argument.
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
