use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use log::{error, info, trace, warn};
use serde::Deserialize;
use std::sync::Arc;
use warp::ws::{Message as WsMessage, WebSocket};

use crate::core::bridge::ChatBridge;
use crate::core::message::Message;
use crate::error::{RelayError, Result};
use crate::transport::{MessageSink, MessageSource};

// Frame sent by a client; the relay assigns the sender itself
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(default)]
    sender: String,
    body: String,
    timestamp: Option<DateTime<Utc>>,
}

impl From<ClientFrame> for Message {
    fn from(frame: ClientFrame) -> Self {
        Message {
            sender: frame.sender,
            body: frame.body,
            timestamp: frame.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Receiving half of a warp WebSocket
pub struct WsSource {
    inner: SplitStream<WebSocket>,
}

impl WsSource {
    pub fn new(inner: SplitStream<WebSocket>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageSource for WsSource {
    async fn receive(&mut self) -> Result<Message> {
        loop {
            let frame = match self.inner.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(RelayError::Receive(e.to_string())),
                None => return Err(RelayError::StreamClosed),
            };

            if frame.is_close() {
                return Err(RelayError::StreamClosed);
            }

            // Only text frames carry chat messages
            let Ok(text) = frame.to_str() else {
                trace!("Ignoring non-text WebSocket frame");
                continue;
            };

            match serde_json::from_str::<ClientFrame>(text) {
                Ok(frame) => return Ok(frame.into()),
                Err(e) => warn!("Ignoring malformed client frame: {}", e),
            }
        }
    }
}

/// Sending half of a warp WebSocket
pub struct WsSink {
    inner: SplitSink<WebSocket, WsMessage>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, WsMessage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: &Message) -> Result<()> {
        let text = serde_json::to_string(message).map_err(|e| RelayError::Encode(e.to_string()))?;
        self.inner
            .send(WsMessage::text(text))
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }
}

// Handle a WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, label: Option<String>, bridge: Arc<ChatBridge>) {
    let (ws_tx, ws_rx) = ws.split();

    match bridge
        .serve(label, WsSource::new(ws_rx), WsSink::new(ws_tx))
        .await
    {
        Ok(summary) => info!(
            "{} ('{}') closed: published {}, delivered {}, dropped {}",
            summary.id,
            summary.label,
            summary.inbound.forwarded,
            summary.outbound.forwarded,
            summary.inbound.dropped + summary.outbound.dropped
        ),
        Err(e) => error!("WebSocket session aborted: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_without_sender_or_timestamp() {
        let frame: ClientFrame = serde_json::from_str(r#"{"body":"hello"}"#).unwrap();
        let message: Message = frame.into();
        assert_eq!(message.body, "hello");
        assert!(message.sender.is_empty());
    }

    #[test]
    fn test_client_frame_requires_body() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"sender":"A"}"#).is_err());
    }
}
