//! Publish/subscribe broker collaborators

pub mod memory;
pub mod traits;

// Re-export the broker interfaces
pub use memory::{BrokerFaults, MemoryBroker, MemoryChannel, MemoryConnection};
pub use traits::{BrokerChannel, BrokerConnection, Deliveries};
