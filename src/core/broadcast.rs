//! The process-wide broadcast medium every session publishes to

use log::info;
use tokio::sync::Mutex;

use crate::broker::{BrokerChannel, BrokerConnection};
use crate::core::codec::{self, Envelope};
use crate::core::message::Message;
use crate::core::session::SessionId;
use crate::error::{RelayError, Result};

/// Shared publish handle for the broadcast medium.
///
/// Broker channels are not assumed safe for concurrent use, so every publish
/// goes through one dedicated channel behind an async mutex.
pub struct BroadcastMedium {
    name: String,
    channel: Mutex<Box<dyn BrokerChannel>>,
}

impl BroadcastMedium {
    /// Open the dedicated publish channel and declare the medium on it
    pub async fn declare(
        connection: &dyn BrokerConnection,
        name: &str,
        durable: bool,
    ) -> Result<Self> {
        let channel = connection
            .open_channel()
            .await
            .map_err(RelayError::into_connect)?;
        if let Err(e) = channel.declare_medium(name, durable).await {
            let _ = channel.close().await;
            return Err(e.into_connect());
        }
        info!("Broadcast medium '{}' ready (durable={})", name, durable);
        Ok(Self {
            name: name.to_string(),
            channel: Mutex::new(channel),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode and publish a message on behalf of `origin` without waiting
    /// for any acknowledgement
    pub async fn publish(&self, origin: SessionId, message: &Message) -> Result<()> {
        let payload = codec::encode(&Envelope::new(origin, message.clone()))?;
        self.publish_raw(payload).await
    }

    /// Publish an already-encoded payload
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<()> {
        let channel = self.channel.lock().await;
        channel.publish(&self.name, payload).await.map_err(|e| match e {
            RelayError::Publish(_) => e,
            other => RelayError::Publish(other.to_string()),
        })
    }

    /// Close the publish channel
    pub async fn close(&self) -> Result<()> {
        self.channel.lock().await.close().await
    }
}
