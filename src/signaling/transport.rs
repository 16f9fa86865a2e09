//! Trait abstraction over the relay WebSocket to enable testing

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens duplex connections to the relay
#[async_trait]
pub trait SignalingConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(Box<dyn SignalingSink>, Box<dyn SignalingStream>)>;
}

/// Outbound half of a relay connection
#[async_trait]
pub trait SignalingSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send a close frame
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a relay connection
#[async_trait]
pub trait SignalingStream: Send {
    /// Next text message; `None` once the relay closed the connection
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// `tokio-tungstenite` backed connector
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl SignalingConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(Box<dyn SignalingSink>, Box<dyn SignalingStream>)> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| AgentError::SignalingDisconnected(format!("Failed to connect to {}: {}", url, e)))?;

        let (sink, stream) = ws.split();
        Ok((Box::new(TungsteniteSink { sink }), Box::new(TungsteniteStream { stream })))
    }
}

struct TungsteniteSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl SignalingSink for TungsteniteSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| AgentError::SignalingDisconnected(format!("Failed to send: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| AgentError::SignalingDisconnected(format!("Failed to close: {}", e)))
    }
}

struct TungsteniteStream {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl SignalingStream for TungsteniteStream {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Dropping non UTF-8 binary frame from relay"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Relay closed the connection: {:?}", frame);
                    return None;
                }
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(AgentError::SignalingDisconnected(format!("Receive failed: {}", e))))
                }
            }
        }
    }
}
