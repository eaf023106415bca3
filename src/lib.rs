//! Rusty Relay - a chat relay that bridges client message streams onto a
//! shared publish/subscribe broadcast medium
//!
//! Every connected client gets an exclusive subscription bound to one
//! process-wide fanout medium. Messages a client sends are published to the
//! medium; everything delivered to its subscription is forwarded back to it.

pub mod broker;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod transport;

// Re-export main components
pub use config::*;
pub use constants::*;
