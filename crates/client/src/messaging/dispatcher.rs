//! Message Dispatcher - routes inbound frames.
//!
//! Precedence for every frame:
//! 1. malformed frames are logged and dropped
//! 2. a pending waiter for the frame's key takes the payload
//! 3. otherwise every persistent subscription for the frame's type gets it
//! 4. in all cases a `Message` event is published on the event bus

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uce_shared::InboundMessage;

use crate::config::CorrelationMode;
use crate::messaging::event_bus::{BusEvent, EventBus, SubscriptionId};
use crate::websocket::core::{PendingWaiters, WaiterKey};

type Handler = Box<dyn FnMut(&Value) -> anyhow::Result<()> + Send + 'static>;

/// Persistent per-type message handlers.
#[derive(Default)]
struct Subscriptions {
    by_type: HashMap<String, Vec<(SubscriptionId, Handler)>>,
}

/// How a frame was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Settled a pending waiter
    Waiter,
    /// Delivered to this many subscriptions
    Subscribers(usize),
    /// Nobody claimed it; only the generic event was published
    Unclaimed,
}

#[derive(Clone)]
pub struct Dispatcher {
    waiters: Arc<Mutex<PendingWaiters>>,
    subscriptions: Arc<Mutex<Subscriptions>>,
    event_bus: EventBus,
    correlation: CorrelationMode,
}

impl Dispatcher {
    pub fn new(event_bus: EventBus, correlation: CorrelationMode) -> Self {
        Self {
            waiters: Arc::new(Mutex::new(PendingWaiters::default())),
            subscriptions: Arc::new(Mutex::new(Subscriptions::default())),
            event_bus,
            correlation,
        }
    }

    /// Waiter table shared with the correlator.
    pub(crate) fn waiters(&self) -> Arc<Mutex<PendingWaiters>> {
        Arc::clone(&self.waiters)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Register a persistent handler for messages of `message_type`.
    ///
    /// Handlers only see frames that no pending request claimed. A handler
    /// returning `Err` (or panicking) is logged and does not affect other
    /// handlers.
    pub async fn subscribe(
        &self,
        message_type: impl Into<String>,
        handler: impl FnMut(&Value) -> anyhow::Result<()> + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscriptions
            .lock()
            .await
            .by_type
            .entry(message_type.into())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        let mut removed = false;
        subscriptions.by_type.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Route one raw frame. Returns `None` for malformed frames.
    pub async fn dispatch(&self, frame: &str) -> Option<Route> {
        let message = match InboundMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, frame_len = frame.len(), "Dropping malformed frame");
                return None;
            }
        };

        let route = if self.resolve_waiter(&message).await {
            Route::Waiter
        } else {
            match self.deliver(&message).await {
                0 => Route::Unclaimed,
                n => Route::Subscribers(n),
            }
        };
        tracing::trace!(message_type = %message.message_type, ?route, "Dispatched frame");

        self.event_bus
            .emit(BusEvent::Message {
                message_type: message.message_type,
                payload: message.payload,
            })
            .await;

        Some(route)
    }

    async fn resolve_waiter(&self, message: &InboundMessage) -> bool {
        let key = match self.correlation {
            CorrelationMode::ReplyType => WaiterKey::ReplyType(message.message_type.clone()),
            CorrelationMode::RequestId => match message.request_id {
                Some(id) => WaiterKey::RequestId(id),
                None => return false,
            },
        };
        self.waiters
            .lock()
            .await
            .resolve(&key, message.payload.clone())
    }

    async fn deliver(&self, message: &InboundMessage) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(handlers) = subscriptions.by_type.get_mut(&message.message_type) else {
            return 0;
        };
        for (id, handler) in handlers.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler(&message.payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    message_type = %message.message_type,
                    subscription = %id,
                    error = %e,
                    "Message handler failed"
                ),
                Err(_) => tracing::error!(
                    message_type = %message.message_type,
                    subscription = %id,
                    "Message handler panicked"
                ),
            }
        }
        handlers.len()
    }
}
