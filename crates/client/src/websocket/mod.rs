//! WebSocket transport for the backend connection.
//!
//! - `core`: runtime-agnostic pending-waiter table and reconnect backoff
//! - `transport`: tokio-tungstenite socket ownership and frame writing

pub(crate) mod core;
mod transport;

pub use transport::{Transport, WsReader};
