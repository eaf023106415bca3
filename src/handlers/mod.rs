pub mod echo;
pub mod websocket;

use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use crate::constants::WS_PATH;
use crate::core::bridge::ChatBridge;

/// Every HTTP and WebSocket route the server exposes
pub fn routes(
    bridge: Arc<ChatBridge>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_bridge(bridge.clone()))
        .map(
            |ws: warp::ws::Ws, params: HashMap<String, String>, bridge: Arc<ChatBridge>| {
                let label = params.get("name").cloned();
                ws.on_upgrade(move |socket| websocket::handle_ws_client(socket, label, bridge))
            },
        );

    let health_route = warp::path("health").and(warp::path::end()).map(|| "OK");

    let stats_route = warp::path("stats")
        .and(warp::path::end())
        .and(with_bridge(bridge))
        .map(|bridge: Arc<ChatBridge>| {
            warp::reply::json(&json!({ "sessions": bridge.session_count() }))
        });

    ws_route
        .or(echo::echo_route())
        .or(health_route)
        .or(stats_route)
}

// Helper function to include the bridge in request state
fn with_bridge(
    bridge: Arc<ChatBridge>,
) -> impl Filter<Extract = (Arc<ChatBridge>,), Error = Infallible> + Clone {
    warp::any().map(move || bridge.clone())
}
