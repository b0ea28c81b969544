//! The websocket connection seam.
//!
//! The manager only ever talks to the [`RelayConnector`] and
//! [`RelayConnection`] traits; production wires in tokio-tungstenite,
//! tests wire in scripted fakes. Subscribing is part of connecting: a
//! connection that cannot send its subscription frame is a failed dial.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::Result;

/// Subscription id used on every peer; one firehose subscription per
/// connection.
pub const SUBSCRIPTION_ID: &str = "driftnet";

/// Dials a relay and subscribes to its firehose.
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>>;
}

/// An open, subscribed relay connection.
#[async_trait]
pub trait RelayConnection: Send {
    /// Next text message, or `None` when the peer has closed.
    async fn next_text(&mut self) -> Result<Option<String>>;

    /// Close the connection; best-effort, errors ignored.
    async fn close(&mut self);
}

/// Production connector over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>> {
        let (mut stream, _response) = connect_async(url).await?;
        let req = serde_json::json!(["REQ", SUBSCRIPTION_ID, {}]);
        stream.send(Message::Text(req.to_string())).await?;
        Ok(Box::new(WsConnection { stream }))
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RelayConnection for WsConnection {
    async fn next_text(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Ping(payload) => {
                    self.stream.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => return Ok(None),
                // Binary, Pong and raw frames carry nothing for us.
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
