//! Error types for the backup pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Another backup or restore is already running (job {0})")]
    Concurrency(String),

    #[error("Database connection failed: {0}")]
    Connectivity(String),

    #[error("Process execution failed: {0}")]
    ProcessExecution(String),

    #[error("Integrity check failed: expected checksum {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backup service is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, BackupError>;
