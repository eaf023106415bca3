//! Abstract broker interfaces for pluggable publish/subscribe backends
//!
//! A connection hands out channels; every channel can declare the broadcast
//! medium, declare and bind exclusive subscriptions, publish, and consume.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

/// Lazy sequence of raw payloads delivered to one subscription.
///
/// The stream ends once the subscription is cancelled or deleted, or the
/// owning channel is closed.
pub type Deliveries = BoxStream<'static, Vec<u8>>;

/// An established broker connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a new channel on this connection
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>>;
}

/// A single broker channel
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a fanout medium. Idempotent for identical parameters.
    async fn declare_medium(&self, name: &str, durable: bool) -> Result<()>;

    /// Declare an exclusive, auto-deleting subscription and return its generated name
    async fn declare_subscription(&self) -> Result<String>;

    /// Bind a subscription to a medium
    async fn bind(&self, subscription: &str, medium: &str) -> Result<()>;

    /// Fire-and-forget publish to every subscription bound to `medium`
    async fn publish(&self, medium: &str, payload: Vec<u8>) -> Result<()>;

    /// Start consuming a subscription
    async fn consume(&self, subscription: &str) -> Result<Deliveries>;

    /// Stop delivering new payloads to a subscription's consumer.
    /// Payloads already queued stay readable.
    async fn cancel(&self, subscription: &str) -> Result<()>;

    /// Delete a subscription. Deleting an absent subscription succeeds.
    async fn delete_subscription(&self, subscription: &str) -> Result<()>;

    /// Close the channel, releasing every exclusive subscription it owns
    async fn close(&self) -> Result<()>;
}
