//! In-memory fanout broker for development and testing
//!
//! Mirrors the subset of AMQP semantics the relay depends on: fanout media,
//! exclusive auto-deleting subscriptions with generated names, one FIFO queue
//! per subscription, and release of a channel's subscriptions when the
//! channel closes. Fault switches let tests simulate an unavailable broker.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::traits::*;
use crate::constants::MEMORY_BROKER_SCHEME;
use crate::error::{RelayError, Result};

/// Toggleable failure modes
#[derive(Debug, Default)]
pub struct BrokerFaults {
    unreachable: AtomicBool,
    fail_publish: AtomicBool,
    fail_cleanup: AtomicBool,
}

impl BrokerFaults {
    /// Reject new connections, channels and declarations
    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    /// Reject every publish
    pub fn set_fail_publish(&self, on: bool) {
        self.fail_publish.store(on, Ordering::SeqCst);
    }

    /// Report errors from subscription deletion and channel close
    pub fn set_fail_cleanup(&self, on: bool) {
        self.fail_cleanup.store(on, Ordering::SeqCst);
    }

    fn unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    fn fail_publish(&self) -> bool {
        self.fail_publish.load(Ordering::SeqCst)
    }

    fn fail_cleanup(&self) -> bool {
        self.fail_cleanup.load(Ordering::SeqCst)
    }
}

struct Medium {
    durable: bool,
    bindings: Vec<String>,
}

struct Queue {
    owner: u64,
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
    receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[derive(Default)]
struct BrokerState {
    media: HashMap<String, Medium>,
    queues: HashMap<String, Queue>,
    open_channels: HashSet<u64>,
}

impl BrokerState {
    fn unbind_everywhere(&mut self, subscription: &str) {
        for medium in self.media.values_mut() {
            medium.bindings.retain(|bound| bound != subscription);
        }
    }

    fn remove_queue(&mut self, subscription: &str) -> bool {
        self.unbind_everywhere(subscription);
        self.queues.remove(subscription).is_some()
    }

    fn release_channel(&mut self, channel_id: u64) -> usize {
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == channel_id)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            self.remove_queue(name);
        }
        self.open_channels.remove(&channel_id);
        owned.len()
    }
}

/// Process-local broker shared by every connection
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    faults: Arc<BrokerFaults>,
    next_channel: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the broker at a `memory://` address
    pub async fn connect(&self, address: &str) -> Result<MemoryConnection> {
        if !address.starts_with(MEMORY_BROKER_SCHEME) {
            return Err(RelayError::Connect(format!(
                "Unsupported broker address: {}",
                address
            )));
        }
        if self.faults.unreachable() {
            return Err(RelayError::Connect(format!("Broker unreachable at {}", address)));
        }
        debug!("Connected to in-memory broker at {}", address);
        Ok(MemoryConnection {
            broker: self.clone(),
        })
    }

    pub fn faults(&self) -> &BrokerFaults {
        &self.faults
    }

    /// Number of live subscriptions across all channels
    pub fn subscription_count(&self) -> usize {
        self.state.lock().map(|state| state.queues.len()).unwrap_or(0)
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.queues.contains_key(name))
            .unwrap_or(false)
    }

    /// Subscriptions currently bound to a medium
    pub fn bindings(&self, medium: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.media.get(medium).map(|m| m.bindings.clone()))
            .unwrap_or_default()
    }

    pub fn open_channel_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.open_channels.len())
            .unwrap_or(0)
    }
}

/// Connection to a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryConnection {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if self.broker.faults.unreachable() {
            return Err(RelayError::Connect("Broker unreachable".to_string()));
        }
        let id = self.broker.next_channel.fetch_add(1, Ordering::Relaxed);
        self.broker.state.lock()?.open_channels.insert(id);
        trace!("Opened broker channel {}", id);
        Ok(Box::new(MemoryChannel {
            id,
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Channel on a [`MemoryBroker`]
pub struct MemoryChannel {
    id: u64,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::ChannelClosed);
        }
        Ok(())
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.broker.faults.unreachable() {
            return Err(RelayError::Connect("Broker unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_medium(&self, name: &str, durable: bool) -> Result<()> {
        self.ensure_open()?;
        self.ensure_reachable()?;
        let mut state = self.broker.state.lock()?;
        match state.media.get(name) {
            Some(existing) if existing.durable != durable => Err(RelayError::Connect(format!(
                "Medium {} already declared with durable={}",
                name, existing.durable
            ))),
            Some(_) => Ok(()),
            None => {
                state.media.insert(
                    name.to_string(),
                    Medium {
                        durable,
                        bindings: Vec::new(),
                    },
                );
                debug!("Declared broadcast medium {} (durable={})", name, durable);
                Ok(())
            }
        }
    }

    async fn declare_subscription(&self) -> Result<String> {
        self.ensure_open()?;
        self.ensure_reachable()?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        let (sender, receiver) = mpsc::unbounded_channel();
        self.broker.state.lock()?.queues.insert(
            name.clone(),
            Queue {
                owner: self.id,
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
        Ok(name)
    }

    async fn bind(&self, subscription: &str, medium: &str) -> Result<()> {
        self.ensure_open()?;
        self.ensure_reachable()?;
        let mut state = self.broker.state.lock()?;
        match state.queues.get(subscription) {
            Some(queue) if queue.owner == self.id => {}
            Some(_) => {
                return Err(RelayError::Connect(format!(
                    "Subscription {} is exclusive to another channel",
                    subscription
                )))
            }
            None => {
                return Err(RelayError::Connect(format!(
                    "Subscription {} not found",
                    subscription
                )))
            }
        }
        let medium = state
            .media
            .get_mut(medium)
            .ok_or_else(|| RelayError::Connect(format!("Medium {} not found", medium)))?;
        if !medium.bindings.iter().any(|bound| bound == subscription) {
            medium.bindings.push(subscription.to_string());
        }
        Ok(())
    }

    async fn publish(&self, medium: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        if self.broker.faults.fail_publish() || self.broker.faults.unreachable() {
            return Err(RelayError::Publish("Broker rejected publish".to_string()));
        }
        let state = self.broker.state.lock()?;
        let target = state
            .media
            .get(medium)
            .ok_or_else(|| RelayError::Publish(format!("Medium {} not found", medium)))?;
        for subscription in &target.bindings {
            if let Some(sender) = state.queues.get(subscription).and_then(|q| q.sender.as_ref()) {
                // A dropped consumer only loses its own copy
                let _ = sender.send(payload.clone());
            }
        }
        trace!("Published {} bytes to {} subscriptions", payload.len(), target.bindings.len());
        Ok(())
    }

    async fn consume(&self, subscription: &str) -> Result<Deliveries> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock()?;
        let queue = state
            .queues
            .get_mut(subscription)
            .filter(|queue| queue.owner == self.id)
            .ok_or_else(|| {
                RelayError::Connect(format!("Subscription {} not available", subscription))
            })?;
        let receiver = queue.receiver.take().ok_or_else(|| {
            RelayError::Connect(format!("Subscription {} already has a consumer", subscription))
        })?;

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|payload| (payload, receiver))
        })
        .boxed())
    }

    async fn cancel(&self, subscription: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock()?;
        state.unbind_everywhere(subscription);
        if let Some(queue) = state.queues.get_mut(subscription) {
            queue.sender = None;
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<()> {
        self.ensure_open()
            .map_err(|e| RelayError::Cleanup(e.to_string()))?;
        if self.broker.faults.fail_cleanup() {
            return Err(RelayError::Cleanup(format!(
                "Broker refused to delete {}",
                subscription
            )));
        }
        if self.broker.state.lock()?.remove_queue(subscription) {
            debug!("Deleted subscription {}", subscription);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let released = self.broker.state.lock()?.release_channel(self.id);
        trace!("Closed broker channel {} ({} subscriptions released)", self.id, released);
        if self.broker.faults.fail_cleanup() {
            return Err(RelayError::Cleanup(format!(
                "Broker reported an error closing channel {}",
                self.id
            )));
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Ok(mut state) = self.broker.state.lock() {
                state.release_channel(self.id);
            }
        }
    }
}
