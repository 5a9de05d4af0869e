//! Connection lifecycle state.
//!
//! The state lives in a shared atomic byte. Only the transport and the
//! reconnection controller write it; everything else observes it through a
//! `ConnectionStateObserver`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Connection state of the backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the backend
    Disconnected,
    /// Attempting to establish connection
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, waiting for the next reconnection attempt
    Reconnecting,
    /// Connection failed (max retries exceeded)
    Failed,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Observable connection state for status displays.
///
/// Multiple observers can share the same underlying state.
#[derive(Clone)]
pub struct ConnectionStateObserver {
    state: Arc<AtomicU8>,
}

impl ConnectionStateObserver {
    pub fn new(state: Arc<AtomicU8>) -> Self {
        Self { state }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Update the shared state (transport and reconnection controller only).
pub(crate) fn set_connection_state(state_ref: &AtomicU8, new_state: ConnectionState) {
    let previous = ConnectionState::from_u8(state_ref.swap(new_state.to_u8(), Ordering::SeqCst));
    if previous != new_state {
        tracing::debug!(from = %previous, to = %new_state, "Connection state changed");
    }
}

/// Move from `from` to `to` only if the state is still `from`.
pub(crate) fn compare_and_set_connection_state(
    state_ref: &AtomicU8,
    from: ConnectionState,
    to: ConnectionState,
) -> bool {
    let swapped = state_ref
        .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();
    if swapped && from != to {
        tracing::debug!(from = %from, to = %to, "Connection state changed");
    }
    swapped
}
