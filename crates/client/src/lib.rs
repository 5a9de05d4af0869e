//! UCE Client - command/response connector for the trading backend.
//!
//! One long-lived WebSocket carries every command the dashboard sends and
//! every reply and push update the backend produces. [`Connector`] owns that
//! channel, reconnects it with exponential backoff, and lets callers await
//! the reply to a command as if it were a plain function call.
//!
//! ```no_run
//! use uce_client::{ClientConfig, Connector, OutboundCommand};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let connector = Connector::new(ClientConfig::from_env()?);
//! connector.connect().await?;
//!
//! let account = connector
//!     .send_message(OutboundCommand::new("get_account_data").with_field("account_id", "a1"))
//!     .await?;
//! println!("{account}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod messaging;
pub mod notify;
pub mod websocket;

pub use config::{ClientConfig, ConfigError, CorrelationMode, ReconnectConfig, TimeoutConfig};
pub use connector::Connector;
pub use error::ConnectError;
pub use messaging::{
    BusEvent, ConnectionState, ConnectionStateObserver, DisconnectReason, EventBus,
    SubscriptionId, TOPIC_CONNECTED, TOPIC_DISCONNECTED, TOPIC_ERROR,
};
pub use notify::{NotifyLevel, StatusNotifier, TracingNotifier};
pub use uce_shared::{InboundMessage, OutboundCommand, RequestError, TimeoutClass};
