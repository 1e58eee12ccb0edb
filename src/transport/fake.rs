//! In-process fake transport for client tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the client under test and drive it from
//! the handle:
//!
//! - Read what the client sent: [`FakeTransportHandle::sent`] or
//!   `handle.outbound_rx.recv().await`
//! - Open or drop the connection: [`FakeTransportHandle::connect`] and
//!   [`FakeTransportHandle::disconnect`]
//! - Inject server events: [`FakeTransportHandle::inject`]
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound_tx  -----> inbound_rx  (client events())
//! ```
//!
//! Like the real socket, `send` fails with `NotConnected` while the fake
//! is disconnected and nothing is recorded.
//!
//! # Example
//!
//! ```
//! use dbachat::protocol::ClientEvent;
//! use dbachat::transport::fake::FakeTransport;
//! use dbachat::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! assert!(transport.send(&ClientEvent::ClearChat).await.is_err());
//!
//! handle.connect();
//! transport.send(&ClientEvent::ClearChat).await.unwrap();
//! assert_eq!(handle.sent(), vec![ClientEvent::ClearChat]);
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{DbaChatError, Result};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::ConnectionStatus;
use crate::transport::{Transport, TransportEvent};

/// In-process fake transport for use in tests
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicUsize>,
}

/// Test-side handle paired with a [`FakeTransport`]
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Events the client sent, in order
    pub outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    /// Raw access to the client's event stream
    pub inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// Create a disconnected `(FakeTransport, FakeTransportHandle)` pair
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let reconnects = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            connected: Arc::clone(&connected),
            reconnects: Arc::clone(&reconnects),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            connected,
            reconnects,
        };

        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, event: &ClientEvent) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DbaChatError::NotConnected.into());
        }
        self.outbound_tx
            .send(event.clone())
            .map_err(|_| DbaChatError::Transport("fake outbound channel closed".to_string()))?;
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn reconnect(&self) {
        if !self.connected.load(Ordering::SeqCst) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
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

impl FakeTransportHandle {
    /// Open the connection and emit [`TransportEvent::Connected`]
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.inbound_tx.send(TransportEvent::Connected);
    }

    /// Drop the connection and emit [`TransportEvent::Disconnected`]
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.inbound_tx.send(TransportEvent::Disconnected);
    }

    /// Deliver a server event to the client
    pub fn inject(&self, event: ServerEvent) {
        let _ = self.inbound_tx.send(TransportEvent::Event(event));
    }

    /// Drain every event sent so far
    pub fn sent(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Number of reconnect requests made while disconnected
    pub fn reconnect_requests(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_fails_while_disconnected() {
        let (transport, mut handle) = FakeTransport::new();
        let err = transport.send(&ClientEvent::ClearChat).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbaChatError>(),
            Some(DbaChatError::NotConnected)
        ));
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (transport, handle) = FakeTransport::new();
        handle.connect();
        handle.inject(ServerEvent::StreamEnd { chat_id: Some(1) });
        handle.disconnect();

        let mut events = transport.events();
        assert_eq!(events.next().await, Some(TransportEvent::Connected));
        assert_eq!(
            events.next().await,
            Some(TransportEvent::Event(ServerEvent::StreamEnd { chat_id: Some(1) }))
        );
        assert_eq!(events.next().await, Some(TransportEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_reconnect_counted_only_when_disconnected() {
        let (transport, handle) = FakeTransport::new();
        transport.reconnect();
        handle.connect();
        transport.reconnect();
        assert_eq!(handle.reconnect_requests(), 1);
        assert_eq!(transport.status(), ConnectionStatus::Connected);
    }
}
