//! Transport layer for relay connections.
//!
//! This module defines the async frame transport trait and implementations
//! for the supported transports. A transport delivers discrete, ordered,
//! complete text frames; it knows nothing about envelopes.

mod memory;
mod websocket;

pub use memory::{pair, MemoryConnector, MemoryListener, MemoryTransport};
pub use websocket::{WebSocketConnection, WebSocketConnector, WebSocketListener};

use async_trait::async_trait;

use crate::chat::error::ChatError;

/// Trait for a bidirectional connection carrying text frames.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: &str) -> Result<(), ChatError>;

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` once the remote side has closed the connection.
    /// Must be cancel-safe: dropping the future before it completes loses
    /// no frame.
    async fn receive(&mut self) -> Result<Option<String>, ChatError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ChatError>;

    /// Get the peer address as a string.
    fn peer_addr(&self) -> Result<String, ChatError>;
}

/// Opens new transport connections to the relay.
///
/// Every session asks for a fresh connection; connectors hold only the
/// address to dial.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection.
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, ChatError>;
}
