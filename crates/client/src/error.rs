//! Connection-level errors.
//!
//! These never reach individual `send_message` callers (they get a
//! `RequestError`); they are returned from `connect()` and published on the
//! event bus as `error` events.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket channel error: {0}")]
    Channel(String),

    #[error("Gave up reconnecting after {attempts} attempts")]
    MaxReconnectExceeded { attempts: u32 },
}
