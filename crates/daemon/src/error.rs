//! Error types for wardend

use thiserror::Error;
use warden_enrollment::SigningError;
use warden_flow_types::FlowError;
use warden_query::QueryError;
use warden_store::StoreError;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input line: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Flow engine error: {0}")]
    Flow(#[from] FlowError),

    #[error("Certificate authority error: {0}")]
    Signing(#[from] SigningError),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}
