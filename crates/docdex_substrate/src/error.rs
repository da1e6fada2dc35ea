//! Error types for substrate operations.

use std::io;
use thiserror::Error;

/// Result type for substrate operations.
pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// Errors that can occur during substrate operations.
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored data failed an integrity check.
    ///
    /// Corruption is fatal for the operation that observed it and is
    /// propagated unchanged; callers must not retry.
    #[error("substrate corrupted: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The substrate has been closed.
    #[error("substrate is closed")]
    Closed,

    /// A snapshot refers to state the substrate no longer retains.
    #[error("stale snapshot: sequence {sequence} has been released")]
    StaleSnapshot {
        /// The snapshot's sequence number.
        sequence: u64,
    },
}

impl SubstrateError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
