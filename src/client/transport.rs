//! Transport seam for the chat client. The reconnection logic is written
//! against these traits so it can be exercised without a network.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait ChannelConn: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    /// Next text frame, or None once the channel is gone.
    async fn recv_text(&mut self) -> Option<String>;
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ChannelConn>, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConn {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl ChannelConn for WsConn {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }
}

/// Real transport: dials `wss://host/ws?token=...`.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn ChannelConn>, TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();
        Ok(Box::new(WsConn { sink, stream }))
    }
}
