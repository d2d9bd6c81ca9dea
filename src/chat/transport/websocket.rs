//! WebSocket transport for relay connections.
//!
//! Frames travel as WebSocket text messages. Binary messages are accepted if
//! they hold UTF-8; ping and pong are answered by the library.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use crate::chat::error::ChatError;
use crate::chat::transport::{Connector, FrameTransport};

/// WebSocket connection wrapper.
pub struct WebSocketConnection<S> {
    stream: WebSocketStream<S>,
    peer_addr: String,
}

impl WebSocketConnection<MaybeTlsStream<TcpStream>> {
    /// Connect to a relay URL such as `ws://localhost:3000`.
    pub async fn connect(url: &str) -> Result<Self, ChatError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChatError::TransportError(format!("Failed to connect: {}", e)))?;
        let peer_addr = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| url.to_string()),
            _ => url.to_string(),
        };
        Ok(Self { stream, peer_addr })
    }
}

impl WebSocketConnection<TcpStream> {
    /// Perform the server side of the handshake on an accepted stream.
    pub async fn accept(stream: TcpStream) -> Result<Self, ChatError> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let stream = accept_async(stream)
            .await
            .map_err(|e| ChatError::TransportError(format!("Handshake failed: {}", e)))?;
        Ok(Self { stream, peer_addr })
    }
}

#[async_trait]
impl<S> FrameTransport for WebSocketConnection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &str) -> Result<(), ChatError> {
        self.stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| ChatError::TransportError(format!("Send failed: {}", e)))
    }

    async fn receive(&mut self) -> Result<Option<String>, ChatError> {
        while let Some(message) = self.stream.next().await {
            let message =
                message.map_err(|e| ChatError::TransportError(format!("Receive failed: {}", e)))?;
            match message {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes).map(Some).map_err(|_| {
                        ChatError::TransportError("binary frame is not UTF-8".to_string())
                    })
                }
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChatError::TransportError(format!("Close failed: {}", e))),
        }
    }

    fn peer_addr(&self) -> Result<String, ChatError> {
        Ok(self.peer_addr.clone())
    }
}

/// WebSocket listener, used by relays and tests.
pub struct WebSocketListener {
    listener: TokioTcpListener,
}

impl WebSocketListener {
    /// Bind to an address and start listening.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ChatError> {
        let listener = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| ChatError::TransportError(format!("Failed to bind: {}", e)))?;
        Ok(Self { listener })
    }

    /// Accept a new connection and complete the WebSocket handshake.
    pub async fn accept(&self) -> Result<WebSocketConnection<TcpStream>, ChatError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChatError::TransportError(format!("Failed to accept: {}", e)))?;
        WebSocketConnection::accept(stream).await
    }

    /// Get the local address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ChatError> {
        self.listener
            .local_addr()
            .map_err(|e| ChatError::TransportError(format!("Failed to get local addr: {}", e)))
    }
}

/// Dials a relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The relay URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, ChatError> {
        let connection = WebSocketConnection::connect(&self.url).await?;
        tracing::debug!(peer = %connection.peer_addr, "websocket connected");
        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_websocket_text_frames() {
        let listener = WebSocketListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut conn = WebSocketConnection::connect(&format!("ws://{}", addr))
                .await
                .unwrap();

            conn.send(r#"{"kind":"hello"}"#).await.unwrap();

            let response = conn.receive().await.unwrap();
            assert_eq!(response.as_deref(), Some("response"));

            conn.close().await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();

        let frame = server_conn.receive().await.unwrap();
        assert_eq!(frame.as_deref(), Some(r#"{"kind":"hello"}"#));

        server_conn.send("response").await.unwrap();

        // Client close arrives as end of stream
        assert_eq!(server_conn.receive().await.unwrap(), None);

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connector() {
        let listener = WebSocketListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = WebSocketConnector::new(format!("ws://{}", addr));

        let client_task = tokio::spawn(async move {
            let mut conn = connector.connect().await.unwrap();
            assert!(conn.peer_addr().unwrap().contains("127.0.0.1"));
            conn.send("ping").await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();
        assert_eq!(server_conn.receive().await.unwrap().as_deref(), Some("ping"));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_frames_in_order() {
        let listener = WebSocketListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut conn = WebSocketConnection::connect(&format!("ws://{}", addr))
                .await
                .unwrap();
            for i in 0..10 {
                conn.send(&format!("msg{}", i)).await.unwrap();
            }
            conn.close().await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();
        for i in 0..10 {
            let frame = server_conn.receive().await.unwrap();
            assert_eq!(frame, Some(format!("msg{}", i)));
        }

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = WebSocketListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketConnector::new(format!("ws://{}", addr)).connect().await;
        assert!(matches!(result, Err(ChatError::TransportError(_))));
    }
}
