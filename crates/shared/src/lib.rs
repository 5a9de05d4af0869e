//! UCE Shared - wire protocol types for the backend connector
//!
//! This crate contains the types exchanged with the trading backend over the
//! dashboard's single WebSocket channel:
//! - `OutboundCommand`: `{ "action": ..., ...fields }` frames sent by the client
//! - `InboundMessage`: `{ "type": ..., "data"?: ... }` frames pushed by the backend
//! - The static action -> reply type table and per-action timeout classes
//! - Client-side request errors
//!
//! No runtime dependencies: pure data types and serialization.

pub mod error;
pub mod messages;
pub mod replies;

pub use error::{ProtocolError, RequestError};
pub use messages::{InboundMessage, OutboundCommand, REQUEST_ID_FIELD};
pub use replies::{expected_reply_type, timeout_class, TimeoutClass};
