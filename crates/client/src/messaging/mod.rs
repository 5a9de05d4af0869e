//! Messaging layer on top of the transport.
//!
//! - `connection`: connection state shared between the connector and observers
//! - `event_bus`: lifecycle and inbound-message events
//! - `dispatcher`: routes inbound frames to waiters, subscribers and the bus
//! - `correlator`: pairs outbound commands with their replies

pub mod connection;
pub(crate) mod correlator;
pub mod dispatcher;
pub mod event_bus;

pub use connection::{ConnectionState, ConnectionStateObserver};
pub use dispatcher::{Dispatcher, Route};
pub use event_bus::{
    BusEvent, DisconnectReason, EventBus, SubscriptionId, TOPIC_CONNECTED, TOPIC_DISCONNECTED,
    TOPIC_ERROR,
};
