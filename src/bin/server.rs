use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_relay::broker::MemoryBroker;
use rusty_relay::config::ServerConfig;
use rusty_relay::core::ChatBridge;
use rusty_relay::handlers::routes;

#[tokio::main]
async fn main() {
    // Load .env before the logger so RUST_LOG can come from it
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, broker={}, medium={}",
        config.host, config.port, config.broker_url, config.medium_name
    );

    let broker = MemoryBroker::new();
    let connection = match broker.connect(&config.broker_url).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let bridge = match ChatBridge::new(Arc::new(connection), config.bridge_options()).await {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => {
            error!("Failed to declare broadcast medium: {}", e);
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown_bridge = bridge.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        shutdown_bridge.shutdown();
    };

    let (bound, server) =
        match warp::serve(routes(bridge.clone())).try_bind_with_graceful_shutdown(addr, shutdown_signal) {
            Ok(bound) => bound,
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                std::process::exit(1);
            }
        };

    info!("Starting Rusty Relay server on {}", bound);
    server.await;

    if let Err(e) = bridge.close().await {
        warn!("Error closing publish channel: {}", e);
    }
    info!("Server stopped");
}
