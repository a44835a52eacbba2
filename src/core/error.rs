use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarmapError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Signal extraction failed: {0}")]
    SignalExtractionError(String),
    #[error("Schema validation failed: {0}")]
    SchemaValidationError(String),
    #[error("Contract reference error: {0}")]
    ContractReferenceError(String),
    #[error("Ceiling exceeded: {0}")]
    CeilingExceededError(String),
    #[error("Safety gate failed: {0}")]
    SafetyGateError(String),
    #[error("Rollback required: {0}")]
    RollbackRequiredError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StarmapError {
    /// CLI exit-code contract: 0 success, 1 validation failure,
    /// 2 I/O failure, 3 safety-gate failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StarmapError::SchemaValidationError(_) | StarmapError::ContractReferenceError(_) => 1,
            StarmapError::IoError(_) | StarmapError::SqliteError(_) => 2,
            StarmapError::CeilingExceededError(_)
            | StarmapError::SafetyGateError(_)
            | StarmapError::RollbackRequiredError(_) => 3,
            _ => 1,
        }
    }
}
