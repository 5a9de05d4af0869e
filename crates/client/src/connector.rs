//! Connector - the single owned entry point to the backend.
//!
//! Wires the transport, dispatcher, correlator and event bus together and
//! runs the reconnection controller. Build one at startup and hand clones to
//! every feature that talks to the backend.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use uce_shared::{OutboundCommand, RequestError};

use crate::config::ClientConfig;
use crate::error::ConnectError;
use crate::messaging::connection::{
    compare_and_set_connection_state, ConnectionState, ConnectionStateObserver,
};
use crate::messaging::correlator::Correlator;
use crate::messaging::dispatcher::Dispatcher;
use crate::messaging::event_bus::{BusEvent, DisconnectReason, EventBus, SubscriptionId};
use crate::notify::{NotifyLevel, StatusNotifier, TracingNotifier};
use crate::websocket::core::{ReconnectBudget, WaiterKey};
use crate::websocket::{Transport, WsReader};

struct Inner {
    config: ClientConfig,
    state: Arc<AtomicU8>,
    transport: Arc<Transport>,
    dispatcher: Dispatcher,
    correlator: Correlator,
    notifier: Arc<dyn StatusNotifier>,
    budget: Mutex<ReconnectBudget>,
    /// Set by `disconnect()`; suppresses reconnection for the resulting close
    intentional_disconnect: AtomicBool,
}

/// Request/response client for the backend WebSocket.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_notifier(config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(config: ClientConfig, notifier: Arc<dyn StatusNotifier>) -> Self {
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8()));
        let transport = Arc::new(Transport::new(config.url.clone(), Arc::clone(&state)));
        let dispatcher = Dispatcher::new(EventBus::new(), config.correlation);
        let correlator = Correlator::new(
            Arc::clone(&transport),
            dispatcher.waiters(),
            config.timeouts.clone(),
            config.correlation,
        );
        let budget = Mutex::new(ReconnectBudget::new(&config.reconnect));

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                transport,
                dispatcher,
                correlator,
                notifier,
                budget,
                intentional_disconnect: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_observer(&self) -> ConnectionStateObserver {
        ConnectionStateObserver::new(Arc::clone(&self.inner.state))
    }

    pub fn event_bus(&self) -> &EventBus {
        self.inner.dispatcher.event_bus()
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the channel. Resolves once the handshake completes.
    ///
    /// A no-op if already connected or connecting. Also the way out of the
    /// `Failed` state after reconnection gave up.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.inner
            .config
            .validate()
            .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;

        let current = self.inner.state.load(Ordering::SeqCst);
        if matches!(
            ConnectionState::from_u8(current),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Ok(());
        }
        if self
            .inner
            .state
            .compare_exchange(
                current,
                ConnectionState::Connecting.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Lost a race with another connect or the reconnection controller
            return Ok(());
        }
        self.inner
            .intentional_disconnect
            .store(false, Ordering::SeqCst);

        match self.establish().await {
            Ok((epoch, reader)) => {
                let this = self.clone();
                tokio::spawn(async move { this.supervise(epoch, reader).await });
                Ok(())
            }
            Err(e) => {
                tracing::error!(url = %self.inner.config.url, error = %e, "Failed to connect to backend");
                if !self.inner.intentional_disconnect.load(Ordering::SeqCst) {
                    self.inner.transport.set_state(ConnectionState::Disconnected);
                }
                self.inner
                    .notifier
                    .notify(NotifyLevel::Error, "Could not connect to the trading backend");
                self.event_bus()
                    .emit(BusEvent::Error { error: e.clone() })
                    .await;
                Err(e)
            }
        }
    }

    /// Close the channel on purpose.
    ///
    /// Idempotent. In-flight requests settle with `RequestError::Cancelled`,
    /// and no reconnection is attempted for the resulting close.
    pub async fn disconnect(&self) {
        self.inner
            .intentional_disconnect
            .store(true, Ordering::SeqCst);

        let cancelled = self.inner.dispatcher.waiters().lock().await.cancel_all();
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "Cancelled pending requests on disconnect");
        }

        let was_open = self.inner.transport.close().await;
        self.inner.transport.set_state(ConnectionState::Disconnected);

        if was_open {
            tracing::info!("Disconnected from backend");
            self.inner
                .notifier
                .notify(NotifyLevel::Info, "Disconnected from the trading backend");
            self.event_bus()
                .emit(BusEvent::Disconnected {
                    reason: DisconnectReason::Requested,
                })
                .await;
        }
    }

    /// Handshake plus bookkeeping for a freshly opened session.
    async fn establish(&self) -> Result<(u64, WsReader), ConnectError> {
        let (epoch, reader) = self.inner.transport.open().await?;

        if self.inner.intentional_disconnect.load(Ordering::SeqCst) {
            self.inner.transport.release(epoch).await;
            self.inner.transport.set_state(ConnectionState::Disconnected);
            return Err(ConnectError::Channel(
                "disconnect requested while connecting".into(),
            ));
        }

        self.inner.budget.lock().await.reset();
        self.inner
            .notifier
            .notify(NotifyLevel::Info, "Connected to the trading backend");
        self.event_bus().emit(BusEvent::Connected).await;
        Ok((epoch, reader))
    }

    /// Owns the read side for the lifetime of the connection, including every
    /// session opened by the reconnection controller.
    async fn supervise(self, mut epoch: u64, mut reader: WsReader) {
        loop {
            let (reason, error) = self.read_until_closed(&mut reader).await;
            if !self.end_session(epoch, reason, error).await {
                return;
            }
            match self.reconnect_with_backoff().await {
                Some((next_epoch, next_reader)) => {
                    epoch = next_epoch;
                    reader = next_reader;
                }
                None => return,
            }
        }
    }

    /// Feed frames to the dispatcher, in arrival order, until the channel ends.
    async fn read_until_closed(&self, reader: &mut WsReader) -> (DisconnectReason, Option<String>) {
        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    self.inner.dispatcher.dispatch(&text).await;
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        self.inner.dispatcher.dispatch(&text).await;
                    }
                    Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Backend closed connection");
                    return (DisconnectReason::ClosedByPeer, None);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    return (DisconnectReason::ChannelError, Some(e.to_string()));
                }
            }
        }
        (DisconnectReason::ClosedByPeer, None)
    }

    /// Tear down a finished session. Returns whether to start reconnecting.
    async fn end_session(
        &self,
        epoch: u64,
        reason: DisconnectReason,
        error: Option<String>,
    ) -> bool {
        if !self.inner.transport.release(epoch).await {
            // Closed by disconnect() or replaced by a newer session
            tracing::debug!(epoch, "Stale session ended");
            return false;
        }

        self.inner.transport.set_state(ConnectionState::Disconnected);
        self.event_bus()
            .emit(BusEvent::Disconnected { reason })
            .await;
        if let Some(error) = error {
            self.event_bus()
                .emit(BusEvent::Error {
                    error: ConnectError::Channel(error),
                })
                .await;
        }

        if self.inner.intentional_disconnect.load(Ordering::SeqCst) {
            return false;
        }
        tracing::info!(?reason, "Connection closed unexpectedly, initiating reconnection");
        self.inner
            .notifier
            .notify(NotifyLevel::Warning, "Connection to the trading backend lost");
        true
    }

    /// Reconnection controller: retry with exponential backoff until a
    /// session opens, the budget is spent, or someone else takes over.
    ///
    /// Every state change is a compare-and-swap from the state this loop
    /// left behind, so an explicit `connect()` or `disconnect()` in between
    /// ends the loop instead of being overwritten.
    async fn reconnect_with_backoff(&self) -> Option<(u64, WsReader)> {
        let mut expected = ConnectionState::Disconnected;
        loop {
            let (delay, attempt, max_attempts) = {
                let mut budget = self.inner.budget.lock().await;
                let max_attempts = budget.max_attempts();
                match budget.next_delay_and_advance() {
                    Some(delay) => (delay, budget.attempt(), max_attempts),
                    None => {
                        drop(budget);
                        self.give_up(expected, max_attempts).await;
                        return None;
                    }
                }
            };

            if !self.transition(expected, ConnectionState::Reconnecting) {
                tracing::debug!(state = %self.state(), "Reconnection superseded");
                return None;
            }
            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnection attempt"
            );
            self.inner.notifier.notify(
                NotifyLevel::Info,
                &format!("Reconnecting to the trading backend ({attempt}/{max_attempts})"),
            );

            tokio::time::sleep(delay).await;

            if self.inner.intentional_disconnect.load(Ordering::SeqCst) {
                tracing::info!("Reconnection cancelled - intentional disconnect");
                return None;
            }
            if !self.transition(ConnectionState::Reconnecting, ConnectionState::Connecting) {
                tracing::debug!(state = %self.state(), "Reconnection superseded by explicit connect");
                return None;
            }

            match self.establish().await {
                Ok(session) => return Some(session),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                    self.event_bus().emit(BusEvent::Error { error: e }).await;
                    expected = ConnectionState::Connecting;
                }
            }
        }
    }

    async fn give_up(&self, from: ConnectionState, attempts: u32) {
        if !self.transition(from, ConnectionState::Failed) {
            return;
        }
        tracing::error!(attempts, "Max reconnection attempts reached, giving up");
        self.inner.notifier.notify(
            NotifyLevel::Error,
            "Lost connection to the trading backend. Reconnect manually to retry.",
        );
        self.event_bus()
            .emit(BusEvent::Error {
                error: ConnectError::MaxReconnectExceeded { attempts },
            })
            .await;
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        compare_and_set_connection_state(&self.inner.state, from, to)
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Fire-and-forget. Returns false if the channel is not open.
    pub async fn send(&self, command: &OutboundCommand) -> bool {
        self.inner.transport.send(command).await
    }

    /// Send a command and await its reply, with the action's default timeout.
    pub async fn send_message(&self, command: OutboundCommand) -> Result<Value, RequestError> {
        self.inner.correlator.send_message(command).await
    }

    /// Send a command and await its reply, overriding the timeout.
    pub async fn send_message_with_timeout(
        &self,
        command: OutboundCommand,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        self.inner
            .correlator
            .send_message_with_timeout(command, timeout)
            .await
    }

    /// Listen for a lifecycle topic (`connected`, `disconnected`, `error`) or
    /// for every message of a given type.
    pub async fn on(
        &self,
        topic: impl Into<String>,
        listener: impl FnMut(&BusEvent) + Send + 'static,
    ) -> SubscriptionId {
        self.event_bus().on(topic, listener).await
    }

    /// Register a persistent handler for push messages of `message_type`
    /// that no pending request claims.
    pub async fn on_message(
        &self,
        message_type: impl Into<String>,
        handler: impl FnMut(&Value) -> anyhow::Result<()> + Send + 'static,
    ) -> SubscriptionId {
        self.inner.dispatcher.subscribe(message_type, handler).await
    }

    /// Remove a listener or message handler.
    pub async fn off(&self, id: SubscriptionId) -> bool {
        self.inner.dispatcher.unsubscribe(id).await || self.event_bus().off(id).await
    }

    /// Number of requests currently awaiting a reply.
    pub async fn pending_requests(&self) -> usize {
        self.inner.dispatcher.waiters().lock().await.len()
    }

    /// Whether a request is waiting on a reply of `reply_type`.
    pub async fn is_awaiting(&self, reply_type: &str) -> bool {
        self.inner
            .dispatcher
            .waiters()
            .lock()
            .await
            .contains(&WaiterKey::ReplyType(reply_type.to_string()))
    }
}

#[cfg(test)]
impl Connector {
    /// Open an in-memory session; returns the stream of outbound frames.
    async fn attach_in_memory(&self) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let (_, frames) = self.inner.transport.attach_in_memory().await;
        frames
    }

    async fn inject(&self, frame: &str) {
        self.inner.dispatcher.dispatch(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrelationMode, TimeoutConfig};
    use crate::messaging::event_bus::TOPIC_DISCONNECTED;
    use crate::notify::MockStatusNotifier;
    use serde_json::json;
    use tokio::time::Instant;

    fn connector() -> Connector {
        Connector::new(ClientConfig::default())
    }

    fn account_request(account_id: &str) -> OutboundCommand {
        OutboundCommand::new("get_account_data").with_field("account_id", account_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_rejects_immediately() {
        let connector = connector();
        let start = Instant::now();

        let err = connector
            .send_message(account_request("a1"))
            .await
            .unwrap_err();

        assert_eq!(err, RequestError::NotConnected);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(connector.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_reply_resolves_with_payload() {
        let connector = connector();
        let mut frames = connector.attach_in_memory().await;

        let caller = connector.clone();
        let call = tokio::spawn(async move { caller.send_message(account_request("a1")).await });

        let sent: Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(sent, json!({"action": "get_account_data", "account_id": "a1"}));
        assert!(connector.is_awaiting("get_account_data_response").await);

        connector
            .inject(r#"{"type": "get_account_data_response", "data": {"balance": 1000}}"#)
            .await;

        assert_eq!(call.await.unwrap().unwrap(), json!({"balance": 1000}));
        assert_eq!(connector.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_late_rejection_after_reply() {
        let connector = connector();
        let mut frames = connector.attach_in_memory().await;

        let caller = connector.clone();
        let call = tokio::spawn(async move {
            caller
                .send_message_with_timeout(OutboundCommand::new("get_portfolio"), Duration::from_secs(5))
                .await
        });
        frames.recv().await.unwrap();
        connector
            .inject(r#"{"type": "portfolio_data", "data": {"positions": []}}"#)
            .await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"positions": []}));

        // Past the original deadline nothing is left to fire
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.pending_requests().await, 0);

        // A late duplicate reply goes nowhere
        connector
            .inject(r#"{"type": "portfolio_data", "data": {"positions": []}}"#)
            .await;
        assert_eq!(connector.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_removes_waiter() {
        let connector = connector();
        let _frames = connector.attach_in_memory().await;
        let start = Instant::now();

        let err = connector
            .send_message_with_timeout(account_request("a1"), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RequestError::Timeout {
                expected: "get_account_data_response".into(),
                after_ms: 2_000
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(connector.pending_requests().await, 0);
        assert!(!connector.is_awaiting("get_account_data_response").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backtest_uses_long_timeout() {
        let connector = connector();
        let _frames = connector.attach_in_memory().await;
        let start = Instant::now();

        let err = connector
            .send_message(OutboundCommand::new("run_backtest").with_field("symbol", "EURUSD"))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(300), "rejected early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_timeout_comes_from_config() {
        let mut config = ClientConfig::default();
        config.timeouts = TimeoutConfig {
            standard: Duration::from_secs(3),
            long: Duration::from_secs(30),
        };
        let connector = Connector::new(config);
        let _frames = connector.attach_in_memory().await;
        let start = Instant::now();

        let err = connector
            .send_message(OutboundCommand::new("get_templates"))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_for_same_reply_type_supersedes_first() {
        let connector = connector();
        let mut frames = connector.attach_in_memory().await;
        let timeout = Duration::from_secs(10);

        let first_caller = connector.clone();
        let first = tokio::spawn(async move {
            let start = Instant::now();
            let result = first_caller
                .send_message_with_timeout(account_request("a1"), timeout)
                .await;
            (result, start.elapsed())
        });
        frames.recv().await.unwrap();

        let second_caller = connector.clone();
        let second = tokio::spawn(async move {
            second_caller
                .send_message_with_timeout(account_request("a2"), timeout)
                .await
        });
        frames.recv().await.unwrap();
        assert_eq!(connector.pending_requests().await, 1);

        connector
            .inject(r#"{"type": "get_account_data_response", "data": {"balance": 250}}"#)
            .await;

        assert_eq!(second.await.unwrap().unwrap(), json!({"balance": 250}));

        let (first_result, first_elapsed) = first.await.unwrap();
        assert!(first_result.unwrap_err().is_timeout());
        assert!(first_elapsed >= timeout);
        assert_eq!(connector.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_id_mode_keeps_concurrent_calls_apart() {
        let mut config = ClientConfig::default();
        config.correlation = CorrelationMode::RequestId;
        let connector = Connector::new(config);
        let mut frames = connector.attach_in_memory().await;

        let first_caller = connector.clone();
        let first = tokio::spawn(async move { first_caller.send_message(account_request("a1")).await });
        let first_frame: Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();

        let second_caller = connector.clone();
        let second =
            tokio::spawn(async move { second_caller.send_message(account_request("a2")).await });
        let second_frame: Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();

        let first_id = first_frame["request_id"].as_u64().unwrap();
        let second_id = second_frame["request_id"].as_u64().unwrap();
        assert!(second_id > first_id);
        assert_eq!(connector.pending_requests().await, 2);

        // Replies arrive out of order
        connector
            .inject(&format!(
                r#"{{"type": "get_account_data_response", "request_id": {second_id}, "data": {{"balance": 2}}}}"#
            ))
            .await;
        connector
            .inject(&format!(
                r#"{{"type": "get_account_data_response", "request_id": {first_id}, "data": {{"balance": 1}}}}"#
            ))
            .await;

        assert_eq!(first.await.unwrap().unwrap(), json!({"balance": 1}));
        assert_eq!(second.await.unwrap().unwrap(), json!({"balance": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_in_flight_requests() {
        let connector = connector();
        let mut frames = connector.attach_in_memory().await;

        let caller = connector.clone();
        let call = tokio::spawn(async move {
            caller
                .send_message(OutboundCommand::new("run_backtest"))
                .await
        });
        frames.recv().await.unwrap();

        connector.disconnect().await;

        assert_eq!(call.await.unwrap().unwrap_err(), RequestError::Cancelled);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(
            connector.send_message(account_request("a1")).await.unwrap_err(),
            RequestError::NotConnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_superseded_caller() {
        let connector = connector();
        let mut frames = connector.attach_in_memory().await;

        let first_caller = connector.clone();
        let first = tokio::spawn(async move { first_caller.send_message(account_request("a1")).await });
        frames.recv().await.unwrap();
        let second_caller = connector.clone();
        let second =
            tokio::spawn(async move { second_caller.send_message(account_request("a2")).await });
        frames.recv().await.unwrap();

        let start = Instant::now();
        connector.disconnect().await;

        assert_eq!(first.await.unwrap().unwrap_err(), RequestError::Cancelled);
        assert_eq!(second.await.unwrap().unwrap_err(), RequestError::Cancelled);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_releases_its_reply_type() {
        let connector = connector();
        let _frames = connector.attach_in_memory().await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            connector.send_message(OutboundCommand::new("get_portfolio")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(connector.pending_requests().await, 0);

        let deliveries = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let deliveries_clone = Arc::clone(&deliveries);
        connector
            .on_message("portfolio_data", move |_| {
                deliveries_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        connector
            .inject(r#"{"type": "portfolio_data", "data": {"positions": []}}"#)
            .await;

        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_calls_leave_no_request_ids_behind() {
        let mut config = ClientConfig::default();
        config.correlation = CorrelationMode::RequestId;
        let connector = Connector::new(config);
        let _frames = connector.attach_in_memory().await;

        for _ in 0..100 {
            let _ = tokio::time::timeout(
                Duration::from_millis(10),
                connector.send_message(OutboundCommand::new("get_portfolio")),
            )
            .await;
        }
        assert_eq!(connector.pending_requests().await, 0);

        // Aborting the task that owns the call cleans up the same way
        let caller = connector.clone();
        let task = tokio::spawn(async move {
            caller
                .send_message(OutboundCommand::new("get_journal_data"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.pending_requests().await, 1);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        tokio::task::yield_now().await;

        assert_eq!(connector.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_loop_yields_to_newer_session() {
        let connector = connector();
        let _frames = connector.attach_in_memory().await;
        let start = Instant::now();

        assert!(connector.reconnect_with_backoff().await.is_none());

        assert_eq!(connector.state(), ConnectionState::Connected);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_loop_stops_after_disconnect_during_backoff() {
        let connector = connector();
        let looping = connector.clone();
        let reconnect = tokio::spawn(async move { looping.reconnect_with_backoff().await.is_none() });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(connector.state(), ConnectionState::Reconnecting);
        connector.disconnect().await;

        assert!(reconnect.await.unwrap());
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_notifies_once() {
        let mut notifier = MockStatusNotifier::new();
        notifier
            .expect_notify()
            .withf(|level, message| *level == NotifyLevel::Info && message.contains("Disconnected"))
            .times(1)
            .return_const(());
        let connector = Connector::with_notifier(ClientConfig::default(), Arc::new(notifier));

        let disconnects = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let disconnects_clone = Arc::clone(&disconnects);
        connector
            .on(TOPIC_DISCONNECTED, move |event| {
                assert_eq!(
                    event,
                    &BusEvent::Disconnected {
                        reason: DisconnectReason::Requested
                    }
                );
                disconnects_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let _frames = connector.attach_in_memory().await;
        connector.disconnect().await;
        connector.disconnect().await;

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(!connector.send(&OutboundCommand::new("get_portfolio")).await);
    }

    #[tokio::test]
    async fn test_push_messages_reach_subscribers_until_removed() {
        let connector = connector();
        let snapshots = Arc::new(std::sync::Mutex::new(Vec::new()));
        let snapshots_clone = Arc::clone(&snapshots);
        let id = connector
            .on_message("realtime_update", move |payload| {
                snapshots_clone.lock().unwrap().push(payload["total_balance"].clone());
                Ok(())
            })
            .await;

        connector
            .inject(r#"{"type": "realtime_update", "data": {"total_balance": 5000}, "timestamp": "t"}"#)
            .await;
        assert!(connector.off(id).await);
        connector
            .inject(r#"{"type": "realtime_update", "data": {"total_balance": 5100}}"#)
            .await;

        assert_eq!(snapshots.lock().unwrap().as_slice(), &[json!(5000)]);
    }

    #[tokio::test]
    async fn test_connect_rejects_non_websocket_url() {
        let connector = Connector::new(ClientConfig::new("http://localhost:8766"));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidUrl(_)));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_observer_tracks_connector_state() {
        let connector = connector();
        let observer = connector.state_observer();
        assert_eq!(observer.state(), ConnectionState::Disconnected);
        connector.inner.transport.set_state(ConnectionState::Reconnecting);
        assert_eq!(observer.state(), ConnectionState::Reconnecting);
        assert!(!connector.is_connected());
    }
}
