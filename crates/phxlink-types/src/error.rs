//! Error types for data parsing in phxlink-types.

use thiserror::Error;

/// Errors that can occur when parsing analyzer wire data.
///
/// This error type is platform-agnostic and does not include transport
/// errors (those belong in phxlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Failed to parse data due to insufficient bytes.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes received.
        actual: usize,
    },

    /// Invalid or unrecognized value encountered during parsing.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Unknown device kind name.
    #[error("Unknown device kind: {0}")]
    UnknownKind(String),
}

impl ParseError {
    /// Create an `InvalidValue` error with a descriptive message.
    #[must_use]
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }
}

/// Result type alias using phxlink-types' [`ParseError`] type.
pub type ParseResult<T> = core::result::Result<T, ParseError>;
