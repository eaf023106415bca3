//! Core relay functionality

pub mod bridge;
pub mod broadcast;
pub mod codec;
pub mod echo;
pub mod message;
pub mod relay;
pub mod session;
pub mod subscription;

// Re-export main components for convenience
pub use bridge::{BridgeOptions, ChatBridge, FlowReport, SessionSummary};
pub use broadcast::BroadcastMedium;
pub use message::Message;
pub use relay::{FlowEnd, FlowStats};
pub use session::{SessionHandle, SessionId, SessionRegistry, SharedRegistry};
pub use subscription::{SubscriptionLifecycle, SubscriptionState};
