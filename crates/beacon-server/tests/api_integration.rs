mod common;

use common::*;

use beacon_core::client::ClientClass;
use beacon_core::net::messages::ServerMessage;

#[tokio::test]
async fn room_listing_reports_seeded_rooms() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/api/v1/rooms", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let rooms: Vec<serde_json::Value> = resp.json().await.unwrap();
    let ids: Vec<&str> = rooms.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["emergency", "general"]);
    assert_eq!(rooms[1]["display_name"], "General Chat");
    assert_eq!(rooms[1]["message_count"], 1);
}

#[tokio::test]
async fn room_history_reflects_published_messages() {
    let server = TestServer::new().await;
    let mut alice = connect_client(&server, Some("alice"), ClientClass::Standard).await;
    join_room(&mut alice, "general").await;
    publish(&mut alice, "general", "situation update", 1).await;
    ws_read_until(&mut alice, |msg| match msg {
        ServerMessage::PublishAck(a) => Some(a),
        _ => None,
    })
    .await;

    let resp = reqwest::get(format!("{}/api/v1/rooms/general/history", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["display_name"], "General Chat");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["body"], "situation update");
    assert_eq!(messages[1]["sender"], "alice");
}

#[tokio::test]
async fn unknown_room_history_is_404() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/api/v1/rooms/nowhere/history", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nowhere"));
}

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let server = TestServer::with_token("sekrit").await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/rooms", server.base_url());

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(&url)
        .header("authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(&url)
        .header("authorization", "Bearer sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Health stays open
    let resp = client
        .get(format!("{}/healthz", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn healthz_reports_connections_and_rooms() {
    let server = TestServer::new().await;
    let _client = connect_client(&server, Some("alice"), ClientClass::Standard).await;

    let resp = reqwest::get(format!("{}/healthz", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rooms"]["active"], 2);
    assert_eq!(body["connections"]["websocket"], 1);
    assert_eq!(body["rooms"]["clients"], 1);
}

#[tokio::test]
async fn readyz_responds() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/readyz", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");
}
