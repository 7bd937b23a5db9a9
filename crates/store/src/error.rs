use crate::urn::Urn;
use crate::value::ValueKind;
use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("access denied to {urn}: {reason}")]
    AccessDenied { urn: Urn, reason: String },

    #[error("object not found: {0}")]
    NotFound(Urn),

    #[error("unknown object type: {0}")]
    UnknownType(String),

    #[error("attribute {attribute} is not declared by type {type_name}")]
    Schema { type_name: String, attribute: String },

    #[error("attribute {attribute} expects {expected} values, got {found}")]
    TypeMismatch {
        attribute: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("handle on {0} was opened read-only")]
    ReadOnly(Urn),

    #[error("object {urn} has type {found}, expected {expected}")]
    WrongType {
        urn: Urn,
        expected: String,
        found: String,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Schema violations: undeclared attributes, unknown types, wrong value types.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. } | Self::UnknownType(_) | Self::TypeMismatch { .. } | Self::WrongType { .. }
        )
    }
}
