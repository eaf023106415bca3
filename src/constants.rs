// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 50051;
pub const WS_PATH: &str = "ws";

// Broker configuration constants
pub const DEFAULT_BROKER_URL: &str = "memory://local";
pub const MEMORY_BROKER_SCHEME: &str = "memory://";
pub const DEFAULT_MEDIUM_NAME: &str = "chat_exchange";

// Session lifecycle constants (seconds, 0 disables the idle timeout)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
