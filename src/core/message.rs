use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message relayed between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub body: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    /// Copy of this message attributed to `sender`, body and timestamp untouched
    pub fn stamped(&self, sender: &str) -> Self {
        Self {
            sender: sender.to_string(),
            body: self.body.clone(),
            timestamp: self.timestamp,
        }
    }
}
