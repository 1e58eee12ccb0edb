//! Socket transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait used by the chat client to
//! talk to the server over one duplex connection. Implementations live in
//! submodules:
//!
//! - [`websocket::WsTransport`] -- WebSocket connection with automatic
//!   reconnection.
//! - [`fake::FakeTransport`] -- in-process fake used in tests.
//!
//! # Design
//!
//! Callers `send` typed [`ClientEvent`]s and consume a stream of
//! [`TransportEvent`]s. Connection changes travel on the same stream as
//! server events, so the client sees them in arrival order and can
//! re-announce its context right after every reconnect.
//!
//! Sends never queue: while the socket is down `send` fails with
//! [`DbaChatError::NotConnected`](crate::error::DbaChatError::NotConnected)
//! and the caller decides what to show and whether to call
//! [`Transport::reconnect`].

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::ConnectionStatus;

pub mod backoff;
pub mod fake;
pub mod websocket;

pub use backoff::Backoff;
pub use websocket::WsTransport;

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket opened (first connect or reconnect)
    Connected,
    /// The socket closed; a reconnect is scheduled
    Disconnected,
    /// A decoded server event
    Event(ServerEvent),
}

/// Abstraction over the duplex connection to the server
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one event to the server
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DbaChatError::NotConnected`] when the socket
    /// is not open. The event is dropped, not queued.
    async fn send(&self, event: &ClientEvent) -> Result<()>;

    /// Current connection status
    fn status(&self) -> ConnectionStatus;

    /// Skip the remaining backoff and try to connect now
    ///
    /// Does nothing while connected.
    fn reconnect(&self);

    /// Stream of connection changes and server events, in arrival order
    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>>;
}
