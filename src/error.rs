//! Error types for dosimeter-link.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No usable link: the session is not (or not yet) `Ready`.
    #[error("Not connected")]
    NotConnected,

    /// Another request (or RSSI read) already occupies the single slot.
    #[error("Request already in flight")]
    RequestAlreadyInFlight,

    /// The transport rejected a chunk write.
    #[error("Transport write failed: {0}")]
    TransportWriteFailed(#[source] std::io::Error),

    /// Platform error outside the write path (e.g. RSSI read could not start).
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Deadline exceeded.
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// Response could not be parsed or did not correlate with the request.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The peripheral answered with a non-success return code.
    #[error("Opcode {opcode:#06x} returned code {code}")]
    ProtocolReturnCode {
        /// Opcode of the failed command.
        opcode: u16,
        /// Return code found in the payload.
        code: u32,
    },

    /// The connection was torn down while the operation was outstanding.
    #[error("Disconnected")]
    Disconnected,
}

impl LinkError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        LinkError::MalformedResponse(msg.into())
    }

    /// True when the error requires a fresh connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::NotConnected | LinkError::Disconnected)
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
