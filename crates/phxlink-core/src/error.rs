//! Error types for phxlink-core.
//!
//! # Recovery strategies
//!
//! | Error | Strategy | Rationale |
//! |-------|----------|-----------|
//! | [`Error::Timeout`] | Retry (2-3 times) | Transient link congestion |
//! | [`Error::Transport`] | Retry, workers escalate after 10 in a row | Serial links drop bytes |
//! | [`Error::SuspectData`] | Retry next poll | One garbled status, filtered semantically |
//! | [`Error::DeviceReported`] | Do not retry | The analyzer refused the request |
//! | [`Error::MalformedFrame`] | Do not retry | Line noise exhausted resync budget |
//! | [`Error::ReconnectNeeded`] | Reconnect the transport | The engine gave up on the stream |
//! | [`Error::EngineStopped`] | Do not retry | Shutdown already requested |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when communicating with a phx-series analyzer.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No correlated reply arrived within the deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Unrecognized or unparseable inbound line after exhausting resyncs.
    #[error("Malformed frame after {resyncs} resync attempts: {line:?}")]
    MalformedFrame {
        /// How many resync attempts were made.
        resyncs: u32,
        /// The offending line, lossily decoded.
        line: String,
    },

    /// The analyzer reported an error for the in-flight request.
    #[error("Device reported error {code} for {request}: {message}")]
    DeviceReported {
        /// The request type the error applies to.
        request: String,
        /// The device error code.
        code: u32,
        /// Human-readable message for the code.
        message: String,
    },

    /// A read or write on the byte stream failed.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A worker exceeded its consecutive transport-fault budget.
    #[error("Reconnect needed after {consecutive_faults} consecutive transport faults")]
    ReconnectNeeded {
        /// How many faults in a row were observed.
        consecutive_faults: u32,
    },

    /// A decoded status failed the junk filter.
    #[error("Suspect data ({reason}), {consecutive} consecutive")]
    SuspectData {
        /// Which bound was violated.
        reason: String,
        /// Consecutive suspect samples so far.
        consecutive: u32,
    },

    /// The engine has been shut down.
    #[error("Engine stopped")]
    EngineStopped,

    /// Failed to parse analyzer wire data.
    #[error(transparent)]
    Parse(#[from] phxlink_types::ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a suspect-data error naming the violated bound.
    pub fn suspect_data(reason: impl Into<String>, consecutive: u32) -> Self {
        Self::SuspectData {
            reason: reason.into(),
            consecutive,
        }
    }

    /// Create a device-reported error.
    pub fn device_reported(request: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self::DeviceReported {
            request: request.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using phxlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::timeout("read_data_extended", Duration::from_secs(2));
        assert!(err.to_string().contains("read_data_extended"));
        assert!(err.to_string().contains("2s"));

        let err = Error::device_reported("FIDR", 22, "low H2");
        assert!(err.to_string().contains("FIDR"));
        assert!(err.to_string().contains("22"));

        let err = Error::suspect_data("battery 16 V", 3);
        assert!(err.to_string().contains("battery 16 V"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link dropped");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("link dropped"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = phxlink_types::ParseError::InsufficientBytes {
            expected: 24,
            actual: 3,
        };
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
