//! Error types for the index engine.

use docdex_codec::CodecError;
use docdex_substrate::SubstrateError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by index maintenance and scans.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A unique index already holds an entry for the inserted value tuple.
    ///
    /// Carries the primary key of the document that owns the existing
    /// entry, resolved eagerly so callers can name it in their own
    /// error messages.
    #[error("unique constraint violated by document '{document_key}'")]
    UniqueConstraintViolation {
        /// Primary key of the conflicting document.
        document_key: String,
    },

    /// A non-sparse index found no value for a required field.
    #[error("indexed attribute '{field}' is missing")]
    AttributeMissing {
        /// The field that produced no value.
        field: String,
    },

    /// A search condition breaks a structural invariant, such as two
    /// equality constraints on the same field.
    #[error("invalid search condition: {message}")]
    InvalidCondition {
        /// Description of the violated invariant.
        message: String,
    },

    /// A value could not be encoded or a stored key failed to decode.
    #[error(transparent)]
    Encoding(#[from] CodecError),

    /// The storage substrate failed. Corruption is fatal and propagated
    /// unchanged, never retried.
    #[error(transparent)]
    Storage(#[from] SubstrateError),

    /// An allocation limit was exceeded.
    #[error("out of memory")]
    OutOfMemory,

    /// A long-running scan observed the shutdown flag and aborted.
    #[error("shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Creates a unique-constraint violation naming the owning document.
    pub fn unique_violation(document_key: impl Into<String>) -> Self {
        Self::UniqueConstraintViolation {
            document_key: document_key.into(),
        }
    }

    /// Creates a missing-attribute error for the given field.
    pub fn attribute_missing(field: impl Into<String>) -> Self {
        Self::AttributeMissing {
            field: field.into(),
        }
    }

    /// Creates an invalid-condition error.
    pub fn invalid_condition(message: impl Into<String>) -> Self {
        Self::InvalidCondition {
            message: message.into(),
        }
    }
}
