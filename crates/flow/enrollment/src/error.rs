//! Errors raised while validating requests and issuing certificates.

use warden_flow_types::FlowError;

pub type SigningResult<T> = Result<T, SigningError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("invalid PEM: {0}")]
    InvalidPem(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signature does not verify")]
    BadSignature,

    #[error("CSR CN {found} does not match public key (expected {expected})")]
    CnMismatch { expected: String, found: String },

    #[error("expected a {expected}, got a {found}")]
    WrongType { expected: String, found: String },

    /// The oracle itself failed, as opposed to the request being bad.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<SigningError> for FlowError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::Signing(msg) => FlowError::Fatal(msg),
            other => FlowError::MalformedRequest(other.to_string()),
        }
    }
}
