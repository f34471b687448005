//! Client side of the bridge transport.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::api::types::{ClientMessage, ServerMessage};
use crate::error::BridgeError;

/// An open, bidirectional message channel to the server.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: &ClientMessage) -> crate::Result<()>;

    /// Next server message, or `None` once the transport is gone.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn recv(&mut self) -> Option<ServerMessage>;

    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> crate::Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a bridge WebSocket endpoint such as `ws://127.0.0.1:3000/ws`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> crate::Result<Box<dyn Transport>> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        debug!("connected to {}", self.url);
        let (sink, stream) = stream.split();
        Ok(Box::new(WebSocketTransport { sink, stream }))
    }
}

struct WebSocketTransport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: &ClientMessage) -> crate::Result<()> {
        let json =
            serde_json::to_string(message).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        self.sink
            .send(Message::text(json))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::parse(text.as_str()) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!("ignoring malformed server frame: {}", e),
                },
                Ok(Message::Close(_)) => return None,
                // Pongs are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => {
                    debug!("transport error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("error closing transport: {}", e);
        }
    }
}
