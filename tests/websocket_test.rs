// Integration test for the Rusty Relay WebSocket server
// Runs the warp routes in-process and talks to them like a real client

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

use rusty_relay::broker::MemoryBroker;
use rusty_relay::core::{BridgeOptions, ChatBridge, Message};
use rusty_relay::handlers::routes;

const WAIT: Duration = Duration::from_secs(2);

async fn start_server() -> (SocketAddr, Arc<ChatBridge>) {
    let broker = MemoryBroker::new();
    let connection = broker.connect("memory://test").await.unwrap();
    let bridge = Arc::new(
        ChatBridge::new(Arc::new(connection), BridgeOptions::default())
            .await
            .unwrap(),
    );
    let (addr, server) = warp::serve(routes(bridge.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, bridge)
}

async fn wait_for_sessions(bridge: &ChatBridge, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while bridge.session_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} sessions, found {}",
            expected,
            bridge.session_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_websocket_clients_exchange_messages() {
    let (addr, bridge) = start_server().await;

    let (mut alice, _) = connect_async(format!("ws://{}/ws?name=alice", addr))
        .await
        .expect("Failed to connect alice");
    let (mut bob, _) = connect_async(format!("ws://{}/ws?name=bob", addr))
        .await
        .expect("Failed to connect bob");
    wait_for_sessions(&bridge, 2).await;

    // The client-supplied sender is replaced by the session label
    let frame = json!({ "sender": "mallory", "body": "hello bob" });
    alice
        .send(WsMessage::Text(frame.to_string()))
        .await
        .expect("Failed to send message");

    let received = tokio::time::timeout(WAIT, bob.next())
        .await
        .expect("Timed out waiting for message")
        .expect("Stream ended")
        .expect("WebSocket error");
    let text = received.into_text().expect("Expected a text frame");
    let message: Message = serde_json::from_str(&text).expect("Invalid message JSON");
    assert_eq!(message.sender, "alice");
    assert_eq!(message.body, "hello bob");

    // Alice does not get her own message back
    assert!(tokio::time::timeout(Duration::from_millis(200), alice.next())
        .await
        .is_err());

    alice.close(None).await.expect("Failed to close alice");
    wait_for_sessions(&bridge, 1).await;
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let (addr, bridge) = start_server().await;

    let (mut alice, _) = connect_async(format!("ws://{}/ws?name=alice", addr))
        .await
        .expect("Failed to connect alice");
    let (mut bob, _) = connect_async(format!("ws://{}/ws?name=bob", addr))
        .await
        .expect("Failed to connect bob");
    wait_for_sessions(&bridge, 2).await;

    alice
        .send(WsMessage::Text("not json at all".to_string()))
        .await
        .unwrap();
    alice
        .send(WsMessage::Text(json!({ "body": "after garbage" }).to_string()))
        .await
        .unwrap();

    let received = tokio::time::timeout(WAIT, bob.next())
        .await
        .expect("Timed out waiting for message")
        .expect("Stream ended")
        .unwrap();
    let message: Message = serde_json::from_str(&received.into_text().unwrap()).unwrap();
    assert_eq!(message.body, "after garbage");
    assert_eq!(bridge.session_count(), 2);
}

#[tokio::test]
async fn test_health_and_stats_routes() {
    let (_addr, bridge) = start_server().await;
    let filter = routes(bridge);

    let health = warp::test::request().path("/health").reply(&filter).await;
    assert_eq!(health.status(), 200);
    assert_eq!(health.body(), "OK");

    let stats = warp::test::request().path("/stats").reply(&filter).await;
    assert_eq!(stats.status(), 200);
    let body: Value = serde_json::from_slice(stats.body()).unwrap();
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_echo_route() {
    let (_addr, bridge) = start_server().await;
    let filter = routes(bridge);

    let response = warp::test::request()
        .method("POST")
        .path("/echo")
        .json(&json!({ "message": "ping" }))
        .reply(&filter)
        .await;

    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["message"], "ping");
}
