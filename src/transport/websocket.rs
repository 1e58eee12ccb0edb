//! WebSocket transport with automatic reconnection
//!
//! [`WsTransport`] owns exactly one logical connection. A supervisor task
//! opens the socket, pumps frames in both directions, and after an
//! unexpected close waits for the [`Backoff`] delay before trying again.
//! [`Transport::reconnect`] cuts the wait short.
//!
//! Inbound text frames are decoded into [`ServerEvent`]s; frames that do
//! not decode are logged and skipped. Connection changes are reported on
//! the same channel as events so ordering is preserved.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{DbaChatError, Result};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::ConnectionStatus;
use crate::transport::{Backoff, Transport, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the transport handle and its supervisor task
#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    /// Frame sender of the live connection; `None` while disconnected
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Shared {
    fn set_writer(&self, writer: Option<mpsc::UnboundedSender<Message>>) {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        *guard = writer;
    }
}

/// Reconnecting WebSocket transport
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use dbachat::transport::{Backoff, WsTransport};
///
/// # #[tokio::main]
/// # async fn main() {
/// let url = url::Url::parse("ws://localhost:8888/ws").unwrap();
/// let transport = WsTransport::connect(url, Backoff::flat(Duration::from_secs(2)), Duration::from_secs(10));
/// # }
/// ```
#[derive(Debug)]
pub struct WsTransport {
    url: url::Url,
    shared: Arc<Shared>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Start the supervisor task and return the transport handle
    ///
    /// Must be called from within a Tokio runtime. The first connection
    /// attempt starts immediately; no I/O happens on the caller's task.
    pub fn connect(url: url::Url, backoff: Backoff, connect_timeout: Duration) -> Self {
        let shared = Arc::new(Shared::default());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            url: url.clone(),
            backoff,
            connect_timeout,
            shared: Arc::clone(&shared),
            inbound_tx,
            wake: Arc::clone(&wake),
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run());

        Self {
            url,
            shared,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
            wake,
            cancel,
        }
    }

    /// Socket URL
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Close the socket and stop reconnecting
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send(&self, event: &ClientEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let guard = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(writer) => {
                tracing::debug!(kind = event.kind(), "Sending event");
                writer
                    .send(Message::Text(payload.into()))
                    .map_err(|_| DbaChatError::NotConnected.into())
            }
            None => Err(DbaChatError::NotConnected.into()),
        }
    }

    fn status(&self) -> ConnectionStatus {
        if self.shared.connected.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn reconnect(&self) {
        if !self.status().is_connected() {
            tracing::debug!("Reconnect requested");
            self.wake.notify_one();
        }
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

/// Background task owning the socket
struct Supervisor {
    url: url::Url,
    backoff: Backoff,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        tracing::info!("Transport started for {}", self.url);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            tracing::debug!("Connecting to {}", self.url);
            match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await
            {
                Ok(Ok((socket, _response))) => {
                    self.backoff.reset();
                    self.pump(socket).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to connect to {}: {}", self.url, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Connecting to {} timed out after {:?}",
                        self.url,
                        self.connect_timeout
                    );
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            let delay = self.backoff.next_delay();
            tracing::info!(attempt = self.backoff.attempt(), "Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    tracing::debug!("Backoff cut short by reconnect request");
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::info!("Transport stopped for {}", self.url);
    }

    /// Drive one open connection until it closes
    async fn pump(&self, socket: Socket) {
        let (mut write, mut read) = socket.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

        self.shared.set_writer(Some(writer_tx));
        self.shared.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to {}", self.url);
        let _ = self.inbound_tx.send(TransportEvent::Connected);

        loop {
            tokio::select! {
                outgoing = writer_rx.recv() => {
                    let Some(message) = outgoing else { break };
                    if let Err(e) = write.send(message).await {
                        tracing::warn!("Socket write error: {}", e);
                        break;
                    }
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.forward(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Server closed the socket: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        // ping/pong are answered by tungstenite; binary frames are not used
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Socket read error: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        self.shared.set_writer(None);
        self.shared.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from {}", self.url);
        let _ = self.inbound_tx.send(TransportEvent::Disconnected);
    }

    fn forward(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                tracing::debug!(kind = event.kind(), "Received event");
                let _ = self.inbound_tx.send(TransportEvent::Event(event));
            }
            Err(e) => {
                tracing::warn!("Skipping undecodable server frame: {} ({})", e, text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn unused_url() -> url::Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        url::Url::parse(&format!("ws://{}/ws", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_without_queueing() {
        let transport = WsTransport::connect(
            unused_url().await,
            Backoff::flat(Duration::from_secs(60)),
            Duration::from_millis(200),
        );

        let err = transport.send(&ClientEvent::ClearChat).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbaChatError>(),
            Some(DbaChatError::NotConnected)
        ));
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        transport.shutdown();
    }

    #[test]
    fn test_transport_is_object_safe() {
        fn assert_object(_: Option<Box<dyn Transport>>) {}
        assert_object(None);
    }
}
