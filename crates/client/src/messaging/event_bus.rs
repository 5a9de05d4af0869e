//! Event Bus for connection lifecycle events and inbound traffic.
//!
//! Listeners register for a topic and get back a `SubscriptionId` to remove
//! themselves later. Topics are the three lifecycle names (`connected`,
//! `disconnected`, `error`) plus every inbound message `type`.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ConnectError;

pub const TOPIC_CONNECTED: &str = "connected";
pub const TOPIC_DISCONNECTED: &str = "disconnected";
pub const TOPIC_ERROR: &str = "error";

/// Token returned by every registration; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the channel went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// The peer sent a close frame or ended the stream
    ClosedByPeer,
    /// The channel failed with an I/O or protocol error
    ChannelError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    Error { error: ConnectError },
    /// Every inbound message, whether or not a waiter or subscription claimed it
    Message { message_type: String, payload: Value },
}

impl BusEvent {
    /// Topic this event is published under.
    pub fn topic(&self) -> &str {
        match self {
            BusEvent::Connected => TOPIC_CONNECTED,
            BusEvent::Disconnected { .. } => TOPIC_DISCONNECTED,
            BusEvent::Error { .. } => TOPIC_ERROR,
            BusEvent::Message { message_type, .. } => message_type,
        }
    }
}

type Listener = Box<dyn FnMut(&BusEvent) + Send + 'static>;

/// Push-based event bus.
///
/// Holds strong references to listeners until they are removed with `off()`
/// or the bus is cleared.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<String, Vec<(SubscriptionId, Listener)>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `topic`.
    ///
    /// Listeners run on the connection's reader task and must not block.
    pub async fn on(
        &self,
        topic: impl Into<String>,
        listener: impl FnMut(&BusEvent) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.listeners
            .lock()
            .await
            .entry(topic.into())
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub async fn off(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().await;
        let mut removed = false;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Deliver an event to every listener of its topic.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub async fn emit(&self, event: BusEvent) {
        let mut listeners = self.listeners.lock().await;
        let Some(entries) = listeners.get_mut(event.topic()) else {
            return;
        };
        for (id, listener) in entries.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(
                    topic = %event.topic(),
                    subscription = %id,
                    "Event listener panicked"
                );
            }
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.listeners
            .lock()
            .await
            .get(topic)
            .map_or(0, |entries| entries.len())
    }

    pub async fn clear(&self) {
        self.listeners.lock().await.clear();
    }
}
