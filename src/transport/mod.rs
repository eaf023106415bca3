//! Client stream collaborators
//!
//! A client connection is split into a receiving half and a sending half so
//! the two relay flows can drive them independently.

pub mod memory;

use async_trait::async_trait;

use crate::core::message::Message;
use crate::error::Result;

/// Receiving half of a client stream
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next client message.
    ///
    /// Any error is terminal for the stream; a clean close by the client
    /// surfaces as [`crate::error::RelayError::StreamClosed`].
    async fn receive(&mut self) -> Result<Message>;
}

/// Sending half of a client stream
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: &Message) -> Result<()>;

    /// Signal that no more messages will be sent
    async fn close(&mut self) -> Result<()>;
}

pub use memory::{pair, ClientEnd, MemorySink, MemorySource};
