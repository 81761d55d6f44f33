//! WebSocket signaling client

use super::protocol::ClientMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Message channel to the signaling server
///
/// `read` blocks until the next message; its failure ends the dispatch
/// loop. `write` may be called concurrently with a pending `read`.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Receive the next message
    async fn read(&self) -> Result<ClientMessage>;

    /// Send a message
    async fn write(&self, message: &ClientMessage) -> Result<()>;

    /// Close the channel; a pending `read` fails once the close completes
    async fn close(&self);
}

/// WebSocket implementation of [`SignalingChannel`] (JSON text frames)
pub struct WebSocketSignaling {
    /// Signaling server URL
    url: String,

    /// Outgoing half
    write: Mutex<SplitSink<WsStream, Message>>,

    /// Incoming half
    read: Mutex<SplitStream<WsStream>>,

    /// Set once `close` has run
    closed: AtomicBool,
}

impl WebSocketSignaling {
    /// Connect to the signaling server
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket signaling server URL (ws:// or wss://)
    /// * `origin` - Optional `Origin` header the server may require
    pub async fn connect(url: &str, origin: Option<&str>) -> Result<Self> {
        info!("Connecting to signaling server: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::WebSocketError(format!("Invalid signaling URL: {}", e)))?;

        if let Some(origin) = origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| Error::InvalidConfig(format!("Invalid origin header: {}", e)))?;
            request.headers_mut().insert("Origin", value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::WebSocketError(format!("WebSocket dial error: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();

        Ok(Self {
            url: url.to_string(),
            write: Mutex::new(write),
            read: Mutex::new(read),
            closed: AtomicBool::new(false),
        })
    }

    /// Signaling server URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn read(&self) -> Result<ClientMessage> {
        let mut read = self.read.lock().await;

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        debug!("Received signaling message: {}", text);
                        return Ok(message);
                    }
                    Err(e) => {
                        warn!("Dropping malformed signaling message: {}", e);
                    }
                },
                Ok(Message::Close(frame)) => {
                    info!("WebSocket connection closed: {:?}", frame);
                    return Err(Error::SignalingError("connection closed".to_string()));
                }
                Ok(_) => {
                    // ping/pong/binary frames carry no signaling
                }
                Err(e) => {
                    error!("error reading from signaling server: {}", e);
                    return Err(Error::WebSocketError(format!(
                        "error reading from signaling server: {}",
                        e
                    )));
                }
            }
        }

        Err(Error::SignalingError("stream ended".to_string()))
    }

    async fn write(&self, message: &ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SignalingError("channel closed".to_string()));
        }

        let text = serde_json::to_string(message)
            .map_err(|e| Error::SerializationError(e.to_string()))?;

        self.write
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| {
                error!("error writing to signaling server: {}", e);
                Error::WebSocketError(format!("error writing to signaling server: {}", e))
            })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("closing signaling client");
        if let Err(e) = self.write.lock().await.close().await {
            warn!("error when closing signaling connection: {}", e);
            return;
        }
        debug!("closed signaling client");
    }
}
