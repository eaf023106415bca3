use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

use crate::core::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    // Broker errors
    Connect(String),
    Publish(String),
    Cleanup(String),
    ChannelClosed,

    // Codec errors
    Encode(String),
    Decode(String),

    // Client stream errors
    Receive(String),
    Send(String),
    StreamClosed,

    // Session errors
    DuplicateId(SessionId),
    InvalidTransition { from: String, to: String },
    ShuttingDown,

    // System errors
    Lock(String),

    // Configuration errors
    Config(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "Broker connect error: {}", msg),
            Self::Publish(msg) => write!(f, "Publish error: {}", msg),
            Self::Cleanup(msg) => write!(f, "Cleanup error: {}", msg),
            Self::ChannelClosed => write!(f, "Broker channel is closed"),
            Self::Encode(msg) => write!(f, "Message encode error: {}", msg),
            Self::Decode(msg) => write!(f, "Message decode error: {}", msg),
            Self::Receive(msg) => write!(f, "Receive error: {}", msg),
            Self::Send(msg) => write!(f, "Send error: {}", msg),
            Self::StreamClosed => write!(f, "Client stream closed"),
            Self::DuplicateId(id) => write!(f, "Session id already registered: {}", id),
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid subscription transition: {} -> {}", from, to)
            }
            Self::ShuttingDown => write!(f, "Relay is shutting down"),
            Self::Lock(msg) => write!(f, "Lock error: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

impl RelayError {
    /// Re-tag a broker failure raised while provisioning a session
    pub fn into_connect(self) -> Self {
        match self {
            Self::Connect(_) => self,
            other => Self::Connect(other.to_string()),
        }
    }
}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for RelayError {
    fn from(err: PoisonError<T>) -> Self {
        RelayError::Lock(format!("Mutex poisoned: {}", err))
    }
}

// Generic result type for the relay
pub type Result<T> = std::result::Result<T, RelayError>;
