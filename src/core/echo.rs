//! Stateless echo capability

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub message: String,
}

/// Return the payload unchanged
pub fn echo(request: EchoRequest) -> EchoResponse {
    EchoResponse {
        message: request.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_returns_payload() {
        let response = echo(EchoRequest {
            message: "Hello from User 1".to_string(),
        });
        assert_eq!(response.message, "Hello from User 1");
    }

    #[test]
    fn test_echo_preserves_empty_and_unicode() {
        assert_eq!(echo(EchoRequest { message: String::new() }).message, "");
        assert_eq!(
            echo(EchoRequest { message: "olá 👋".to_string() }).message,
            "olá 👋"
        );
    }
}
