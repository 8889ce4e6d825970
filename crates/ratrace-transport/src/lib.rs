//! Push-channel transport for Ratrace.
//!
//! The engine only needs a reliable, ordered, per-connection message
//! channel. [`Transport`] accepts such channels, and every accepted
//! [`Connection`] splits into a [`FrameReader`] and a [`FrameWriter`] so
//! outbound pushes never wait behind a pending read.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketReader, WebSocketTransport, WebSocketWriter};

use std::fmt;
use std::net::SocketAddr;

/// Identifier of one live socket. A reconnecting player gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;

    /// The address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// A freshly accepted connection, not yet split.
pub trait Connection: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;

    /// Separates the inbound and outbound halves so they can live in
    /// different tasks.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Inbound half of a connection.
pub trait FrameReader: Send + 'static {
    /// Receives the next frame. Returns `Ok(None)` when the peer closed
    /// the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Outbound half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Sends one frame. UTF-8 payloads go out as text frames, anything
    /// else as binary.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Closes the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
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
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "first socket");
        map.insert(ConnectionId::new(2), "second socket");
        assert_eq!(map[&ConnectionId::new(1)], "first socket");
    }
}
