//! Error types for the wire protocol and for individual requests.

use thiserror::Error;

/// Client-side request errors.
///
/// Every `send_message` call settles with exactly one payload or exactly one
/// of these errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The channel was not open when the command was handed to the transport.
    /// No timer is started in this case.
    #[error("Not connected to server")]
    NotConnected,

    /// No matching reply arrived within the allotted window.
    #[error("Request timed out after {after_ms}ms waiting for '{expected}'")]
    Timeout { expected: String, after_ms: u64 },

    /// The connection was closed explicitly while the request was in flight.
    #[error("Request was cancelled")]
    Cancelled,

    /// The command could not be encoded as a JSON frame.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RequestError {
    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
    }
}

/// Errors produced while parsing an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame has no string 'type' field")]
    MissingType,

    #[error("Command has no string 'action' field")]
    MissingAction,
}
