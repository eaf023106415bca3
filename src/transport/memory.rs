//! In-process client stream, used by tests and local tooling

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource};
use crate::core::message::Message;
use crate::error::{RelayError, Result};

/// Create a connected stream pair: the client end plus the two server halves
pub fn pair() -> (ClientEnd, MemorySource, MemorySink) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    (
        ClientEnd {
            to_server: Some(to_server),
            from_server: Some(from_server),
        },
        MemorySource { inbound },
        MemorySink {
            outbound: Some(outbound),
        },
    )
}

/// The client's side of an in-process stream
pub struct ClientEnd {
    to_server: Option<mpsc::UnboundedSender<Result<Message>>>,
    from_server: Option<mpsc::UnboundedReceiver<Message>>,
}

impl ClientEnd {
    /// Send a message to the server
    pub fn send(&self, message: Message) -> Result<()> {
        let sender = self.to_server.as_ref().ok_or(RelayError::StreamClosed)?;
        sender
            .send(Ok(message))
            .map_err(|_| RelayError::Send("Server side of stream is gone".to_string()))
    }

    /// Half-close: the server sees a clean end of stream
    pub fn close_send(&mut self) {
        self.to_server = None;
    }

    /// Make the server's next receive fail with a transport error
    pub fn fail(&mut self, reason: &str) {
        if let Some(sender) = self.to_server.take() {
            let _ = sender.send(Err(RelayError::Receive(reason.to_string())));
        }
    }

    /// Stop reading while keeping the sending side open
    pub fn stop_reading(&mut self) {
        self.from_server = None;
    }

    /// Drop both directions; server sends fail from now on
    pub fn disconnect(&mut self) {
        self.to_server = None;
        self.from_server = None;
    }

    /// Wait for the next message from the server, `None` once the server closed
    pub async fn recv(&mut self) -> Option<Message> {
        match self.from_server.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// Like [`ClientEnd::recv`] but gives up after `wait`
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.recv()).await.ok().flatten()
    }
}

/// Server-side receiving half of an in-process stream
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn receive(&mut self) -> Result<Message> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(RelayError::StreamClosed),
        }
    }
}

/// Server-side sending half of an in-process stream
pub struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, message: &Message) -> Result<()> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(|| RelayError::Send("Stream already closed".to_string()))?;
        sender
            .send(message.clone())
            .map_err(|_| RelayError::Send("Client is gone".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.outbound = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (mut client, mut source, mut sink) = pair();

        client.send(Message::new("A", "up")).unwrap();
        assert_eq!(source.receive().await.unwrap().body, "up");

        sink.send(&Message::new("B", "down")).await.unwrap();
        assert_eq!(client.recv().await.unwrap().body, "down");
    }

    #[tokio::test]
    async fn test_close_send_ends_stream() {
        let (mut client, mut source, _sink) = pair();
        client.close_send();
        assert_eq!(source.receive().await.unwrap_err(), RelayError::StreamClosed);
        assert!(client.send(Message::new("A", "late")).is_err());
    }

    #[tokio::test]
    async fn test_fail_surfaces_receive_error() {
        let (mut client, mut source, _sink) = pair();
        client.fail("connection reset");
        assert!(matches!(source.receive().await, Err(RelayError::Receive(_))));
    }

    #[tokio::test]
    async fn test_disconnect_fails_server_sends() {
        let (mut client, _source, mut sink) = pair();
        client.disconnect();
        assert!(matches!(
            sink.send(&Message::new("B", "lost")).await,
            Err(RelayError::Send(_))
        ));
    }

    #[tokio::test]
    async fn test_sink_close_ends_client_recv() {
        let (mut client, _source, mut sink) = pair();
        sink.close().await.unwrap();
        assert!(client.recv().await.is_none());
    }
}
