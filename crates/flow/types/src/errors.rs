//! Error types for flows and the flow engine.

use crate::ids::{RequestId, SessionId};
use warden_store::StoreError;

/// Result type for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised by flow handlers and by the engine that runs them.
///
/// Handler errors never leave the engine: they mark the instance failed and
/// are recorded in its log.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// The request failed semantic validation. Aborts the instance.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A client call went unanswered after every retry.
    #[error("client did not answer request {request_id} of {session_id} after {attempts} attempts")]
    TransientClientError {
        session_id: SessionId,
        request_id: RequestId,
        attempts: u32,
    },

    /// Unexpected handler failure, including panics.
    #[error("fatal flow error: {0}")]
    Fatal(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("flow {flow} has no state {state}")]
    UnknownState { flow: String, state: String },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("flow state persistence failed: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FlowError {
    /// Whether the error aborts an instance because of what it was sent,
    /// as opposed to something going wrong on our side.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedRequest(_))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
