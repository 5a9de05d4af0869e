//! Request/Response Correlator.
//!
//! Turns "send a command" into "send a command and await its reply". The
//! reply is found either by the reply type inferred from the command's action
//! or, in request-id mode, by an identifier the peer echoes back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uce_shared::{OutboundCommand, RequestError};

use crate::config::{CorrelationMode, TimeoutConfig};
use crate::websocket::core::{PendingWaiters, WaiterKey, WaiterOutcome, WaiterToken};
use crate::websocket::Transport;

#[derive(Clone)]
pub(crate) struct Correlator {
    transport: Arc<Transport>,
    waiters: Arc<Mutex<PendingWaiters>>,
    timeouts: TimeoutConfig,
    correlation: CorrelationMode,
    next_request_id: Arc<AtomicU64>,
}

impl Correlator {
    pub(crate) fn new(
        transport: Arc<Transport>,
        waiters: Arc<Mutex<PendingWaiters>>,
        timeouts: TimeoutConfig,
        correlation: CorrelationMode,
    ) -> Self {
        Self {
            transport,
            waiters,
            timeouts,
            correlation,
            next_request_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send a command and await its reply using the action's default timeout.
    pub(crate) async fn send_message(&self, command: OutboundCommand) -> Result<Value, RequestError> {
        let timeout = self.timeouts.for_class(command.timeout_class());
        self.send_message_with_timeout(command, timeout).await
    }

    /// Send a command and await its reply.
    ///
    /// Settles exactly once:
    /// - `Ok(payload)` when a matching reply arrives first
    /// - `NotConnected` immediately if the channel is not open (no timer runs)
    /// - `Timeout` when the deadline passes first, including when a newer call
    ///   for the same reply type displaced this one
    /// - `Cancelled` when the connection is closed with `disconnect()`
    ///
    /// Dropping the returned future removes the waiter.
    pub(crate) async fn send_message_with_timeout(
        &self,
        command: OutboundCommand,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let (command, key) = self.prepare(command);
        let frame = command
            .to_json()
            .map_err(|e| RequestError::Serialization(e.to_string()))?;

        // Register before sending so a fast reply cannot slip past
        let (token, rx) = self.waiters.lock().await.register(key.clone());
        let registration = Registration {
            waiters: Arc::clone(&self.waiters),
            key,
            token,
            armed: true,
        };

        if !self.transport.send_frame(frame).await {
            registration.remove().await;
            tracing::debug!(action = %command.action(), "Send failed - not connected");
            return Err(RequestError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(WaiterOutcome::Reply(payload))) => {
                registration.settled();
                Ok(payload)
            }
            Ok(Ok(WaiterOutcome::Cancelled)) | Ok(Err(_)) => {
                registration.settled();
                Err(RequestError::Cancelled)
            }
            Err(_) => {
                let error = Self::timeout_error(&registration.key, timeout);
                tracing::debug!(
                    action = %command.action(),
                    waiting_for = %registration.key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out - cleaned up pending waiter"
                );
                registration.remove().await;
                Err(error)
            }
        }
    }

    fn prepare(&self, command: OutboundCommand) -> (OutboundCommand, WaiterKey) {
        match self.correlation {
            CorrelationMode::ReplyType => {
                let key = WaiterKey::ReplyType(command.reply_type().into_owned());
                (command, key)
            }
            CorrelationMode::RequestId => {
                let id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
                (command.with_request_id(id), WaiterKey::RequestId(id))
            }
        }
    }

    fn timeout_error(key: &WaiterKey, timeout: Duration) -> RequestError {
        RequestError::Timeout {
            expected: key.to_string(),
            after_ms: timeout.as_millis() as u64,
        }
    }
}

/// A registered waiter owned by one in-flight call.
///
/// Removed from the table when the call gives up, or when the call's future
/// is dropped before it settles.
struct Registration {
    waiters: Arc<Mutex<PendingWaiters>>,
    key: WaiterKey,
    token: WaiterToken,
    armed: bool,
}

impl Registration {
    async fn remove(mut self) {
        self.armed = false;
        self.waiters
            .lock()
            .await
            .remove_registration(&self.key, self.token);
    }

    /// The dispatcher or `cancel_all` already took the waiter out.
    fn settled(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut waiters) = self.waiters.try_lock() {
            waiters.remove_registration(&self.key, self.token);
            return;
        }
        // Table busy; finish the cleanup on the runtime
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let waiters = Arc::clone(&self.waiters);
        let key = self.key.clone();
        let token = self.token;
        handle.spawn(async move {
            waiters.lock().await.remove_registration(&key, token);
        });
    }
}
