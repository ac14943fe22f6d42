//! Unified error types for Orchestra

use thiserror::Error;

/// Unified error type for all Orchestra operations
#[derive(Error, Debug)]
pub enum OrchestraError {
    // Oracle errors
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Oracle limit: {0}")]
    OracleLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // Execution errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    // Persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using OrchestraError
pub type Result<T> = std::result::Result<T, OrchestraError>;
