//! In-process transport.
//!
//! A pair of channels standing in for a network connection. Used for tests
//! and for embedding a relay in the same process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat::error::ChatError;
use crate::chat::transport::{Connector, FrameTransport};

/// One end of an in-process duplex connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
    label: String,
}

/// Create two connected transports.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: a_rx,
            label: "memory:a".to_string(),
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: b_rx,
            label: "memory:b".to_string(),
        },
    )
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&mut self, frame: &str) -> Result<(), ChatError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ChatError::TransportError("connection closed".to_string()))?;
        tx.send(frame.to_string())
            .map_err(|_| ChatError::TransportError("peer went away".to_string()))
    }

    async fn receive(&mut self) -> Result<Option<String>, ChatError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn peer_addr(&self) -> Result<String, ChatError> {
        Ok(self.label.clone())
    }
}

/// Accepts connections made through a matching [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryTransport>,
}

impl MemoryListener {
    /// Create a listener and the connector that dials it.
    pub fn open() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { incoming: rx }, MemoryConnector { listener: tx })
    }

    /// Wait for the next connection. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryTransport> {
        self.incoming.recv().await
    }
}

/// Dials a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    listener: mpsc::UnboundedSender<MemoryTransport>,
}

impl MemoryConnector {
    /// Open a connection and return the concrete client end.
    pub fn dial(&self) -> Result<MemoryTransport, ChatError> {
        let (client, server) = pair();
        self.listener
            .send(server)
            .map_err(|_| ChatError::TransportError("connection refused".to_string()))?;
        Ok(client)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, ChatError> {
        Ok(Box::new(self.dial()?))
    }
}
