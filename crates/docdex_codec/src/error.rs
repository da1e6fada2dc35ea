//! Error types for codec operations.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding index keys.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value cannot be represented in the order-preserving encoding.
    #[error("encoding failure: {message}")]
    EncodingFailure {
        /// Description of what could not be encoded or decoded.
        message: String,
    },

    /// A buffer ended before a complete field was read.
    #[error("truncated key: expected {expected} more bytes at offset {offset}")]
    Truncated {
        /// Offset at which the reader stopped.
        offset: usize,
        /// Minimum number of missing bytes.
        expected: usize,
    },

    /// An unknown type tag was encountered.
    #[error("unknown type tag {tag:#04x} at offset {offset}")]
    UnknownTag {
        /// The unrecognized tag byte.
        tag: u8,
        /// Offset of the tag.
        offset: usize,
    },
}

impl CodecError {
    /// Creates an encoding failure error.
    pub fn encoding_failure(message: impl Into<String>) -> Self {
        Self::EncodingFailure {
            message: message.into(),
        }
    }
}
