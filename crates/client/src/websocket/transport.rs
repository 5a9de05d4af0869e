//! Transport Connection - owns the single WebSocket to the backend.
//!
//! Each successful `open()` starts a new session identified by an epoch. The
//! write half is driven by a spawned task fed through an unbounded channel;
//! the read half is handed back to the caller, which owns the read loop.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uce_shared::OutboundCommand;

use crate::error::ConnectError;
use crate::messaging::connection::{set_connection_state, ConnectionState};

/// Read half of an open session.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct Session {
    epoch: u64,
    tx: mpsc::UnboundedSender<String>,
}

pub struct Transport {
    url: String,
    state: Arc<AtomicU8>,
    session: Mutex<Option<Session>>,
    epoch: AtomicU64,
}

impl Transport {
    pub fn new(url: impl Into<String>, state: Arc<AtomicU8>) -> Self {
        Self {
            url: url.into(),
            state,
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        set_connection_state(&self.state, state);
    }

    /// Perform the WebSocket handshake and start a new session.
    ///
    /// Resolves once the channel is open. Any previous session is replaced;
    /// dropping its sender ends its writer, which closes that socket.
    pub async fn open(&self) -> Result<(u64, WsReader), ConnectError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let (mut write, read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!(error = %e, "Failed to write frame");
                    break;
                }
            }
            // Sender dropped: the session was closed or replaced
            let _ = write.close().await;
        });

        let epoch = self.install(tx).await;
        self.set_state(ConnectionState::Connected);
        tracing::info!(url = %self.url, epoch, "Connected to backend");
        Ok((epoch, read))
    }

    async fn install(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.session.lock().await.replace(Session { epoch, tx });
        if let Some(previous) = previous {
            tracing::debug!(epoch = previous.epoch, "Replaced previous session");
        }
        epoch
    }

    /// Queue a text frame. Returns false if no channel is open.
    pub async fn send_frame(&self, frame: String) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) => session.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Serialize and queue a command. Returns false if no channel is open or
    /// the command cannot be encoded.
    pub async fn send(&self, command: &OutboundCommand) -> bool {
        match command.to_json() {
            Ok(frame) => self.send_frame(frame).await,
            Err(e) => {
                tracing::error!(action = %command.action(), error = %e, "Failed to serialize command");
                false
            }
        }
    }

    /// Close the current session, if any. Returns whether one was open.
    pub async fn close(&self) -> bool {
        self.session.lock().await.take().is_some()
    }

    /// Drop the session for `epoch` after its read half ended.
    ///
    /// Returns false when that session was already closed or replaced, in
    /// which case the caller must not touch the connection state.
    pub async fn release(&self, epoch: u64) -> bool {
        let mut session = self.session.lock().await;
        match session.as_ref() {
            Some(current) if current.epoch == epoch => {
                session.take();
                true
            }
            _ => false,
        }
    }

    /// Install a session backed by an in-memory channel instead of a socket.
    #[cfg(test)]
    pub(crate) async fn attach_in_memory(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = self.install(tx).await;
        self.set_state(ConnectionState::Connected);
        (epoch, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::new(
            "ws://127.0.0.1:9",
            Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8())),
        )
    }

    #[tokio::test]
    async fn test_send_without_session_returns_false() {
        let transport = transport();
        assert!(!transport.send(&OutboundCommand::new("get_portfolio")).await);
        assert!(!transport.close().await);
    }

    #[tokio::test]
    async fn test_send_writes_serialized_frame() {
        let transport = transport();
        let (_, mut frames) = transport.attach_in_memory().await;
        assert_eq!(transport.state(), ConnectionState::Connected);

        let cmd = OutboundCommand::new("get_journal_data").with_field("limit", 20);
        assert!(transport.send(&cmd).await);

        let frame = frames.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "get_journal_data");
        assert_eq!(value["limit"], 20);
    }

    #[tokio::test]
    async fn test_release_ignores_stale_epochs() {
        let transport = transport();
        let (first, _rx1) = transport.attach_in_memory().await;
        let (second, _rx2) = transport.attach_in_memory().await;
        assert_ne!(first, second);

        assert!(!transport.release(first).await);
        assert!(transport.send_frame("{}".into()).await);
        assert!(transport.release(second).await);
        assert!(!transport.send_frame("{}".into()).await);
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_is_gone() {
        let transport = transport();
        let (_, frames) = transport.attach_in_memory().await;
        drop(frames);
        assert!(!transport.send_frame("{}".into()).await);
    }

    #[tokio::test]
    async fn test_open_fails_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = Transport::new(
            format!("ws://{addr}"),
            Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8())),
        );
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }
}
