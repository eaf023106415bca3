//! Server configuration module
//! Handles runtime configuration parameters for the relay server

use crate::constants::{
    DEFAULT_BROKER_URL, DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_MEDIUM_NAME, DEFAULT_PORT, MEMORY_BROKER_SCHEME,
};
use crate::core::bridge::BridgeOptions;
use crate::error::{RelayError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Address of the broker the relay publishes through
    pub broker_url: String,
    /// Name of the broadcast medium every session binds to
    pub medium_name: String,
    pub medium_durable: bool,
    /// Deliver a sender's own messages back to it
    pub self_delivery: bool,
    /// Inbound idle limit, `None` when disabled
    pub idle_timeout: Option<Duration>,
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            broker_url: DEFAULT_BROKER_URL.to_string(),
            medium_name: DEFAULT_MEDIUM_NAME.to_string(),
            medium_durable: true,
            self_delivery: false,
            idle_timeout: idle_limit(DEFAULT_IDLE_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let host = lookup("RUSTY_RELAY_HOST").unwrap_or(defaults.host);
        let port = parse_or(&lookup, "RUSTY_RELAY_PORT", defaults.port)?;

        let broker_url = lookup("RUSTY_RELAY_BROKER_URL").unwrap_or(defaults.broker_url);
        if !broker_url.starts_with(MEMORY_BROKER_SCHEME) {
            return Err(RelayError::Config(format!(
                "Unsupported broker address '{}', expected a {} URL",
                broker_url, MEMORY_BROKER_SCHEME
            )));
        }

        let medium_name = lookup("RUSTY_RELAY_MEDIUM").unwrap_or(defaults.medium_name);
        if medium_name.trim().is_empty() {
            return Err(RelayError::Config(
                "RUSTY_RELAY_MEDIUM must not be empty".to_string(),
            ));
        }

        let medium_durable =
            flag_or(&lookup, "RUSTY_RELAY_MEDIUM_DURABLE", defaults.medium_durable)?;
        let self_delivery =
            flag_or(&lookup, "RUSTY_RELAY_SELF_DELIVERY", defaults.self_delivery)?;

        let idle_timeout = match lookup("RUSTY_RELAY_IDLE_TIMEOUT") {
            Some(_) => idle_limit(parse_or(&lookup, "RUSTY_RELAY_IDLE_TIMEOUT", 0)?),
            None => defaults.idle_timeout,
        };
        let drain_timeout = parse_or(
            &lookup,
            "RUSTY_RELAY_DRAIN_TIMEOUT",
            defaults.drain_timeout.as_secs(),
        )
        .map(Duration::from_secs)?;

        Ok(Self {
            host,
            port,
            broker_url,
            medium_name,
            medium_durable,
            self_delivery,
            idle_timeout,
            drain_timeout,
        })
    }

    /// Options handed to the bridge orchestrator
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            medium_name: self.medium_name.clone(),
            medium_durable: self.medium_durable,
            self_delivery: self.self_delivery,
            idle_timeout: self.idle_timeout,
            drain_timeout: self.drain_timeout,
        }
    }
}

// 0 disables the idle timeout
fn idle_limit(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(RelayError::Config(format!(
            "Invalid value for {}: '{}', expected true or false",
            key, raw
        ))),
    }
}
