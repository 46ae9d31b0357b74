//! Transport abstraction layer for mazenet.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the network protocol, a WebSocket implementation for both roles
//! (server accept, client connect), and the per-connection [`Outbox`]
//! that keeps control traffic and replication traffic on separate lanes.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod outbox;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use outbox::{Outbox, REPLICATION_BACKLOG, WriterHandle, spawn_writer};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientConnection, PendingConnection, ServerConnection,
    WebSocketConnection, WebSocketTransport, connect,
};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The logical channel an outbound frame travels on.
///
/// Both lanes share one socket, but each has its own queue so a burst of
/// replication frames never delays session control traffic queued behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Session control: handshake, identity, clock, map, move intents.
    Control,
    /// Entity/component replication batches.
    Replication,
}

/// Delivery intent chosen by the sender of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Delivery {
    /// Guaranteed, ordered. A failed send ends the connection's writer.
    #[default]
    Reliable,
    /// Best effort. A failed send is dropped and the writer keeps going.
    Unreliable,
}

/// An encoded message waiting in a connection's outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Which lane the frame is queued on.
    pub lane: Lane,
    /// How hard the writer tries to deliver it.
    pub delivery: Delivery,
    /// The encoded envelope.
    pub bytes: Vec<u8>,
}

/// Accepts new incoming connections.
///
/// Accepting and upgrading are separate steps so the accept loop never
/// waits on a peer: it hands each [`Upgrade`] to its own task.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// An accepted peer that still has to complete the protocol upgrade.
    type Pending: Upgrade<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming peer.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// Turns an accepted peer into a usable [`Connection`].
pub trait Upgrade: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_orders_by_value() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1)];
        ids.sort();
        assert_eq!(ids, vec![ConnectionId::new(1), ConnectionId::new(3)]);
    }

    #[test]
    fn test_delivery_default_is_reliable() {
        assert_eq!(Delivery::default(), Delivery::Reliable);
    }
}
