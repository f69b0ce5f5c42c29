#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use beacon_core::client::ClientClass;
use beacon_core::net::messages::{
    ClientMessage, HelloMsg, HistoryMsg, JoinMsg, PublishMsg, RoomDataMsg, ServerMessage,
};
use beacon_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_client_message,
};
use beacon_server::build_app;
use beacon_server::config::BeaconConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with the default config (no auth).
    pub async fn new() -> Self {
        Self::from_config(BeaconConfig::default()).await
    }

    /// Start a test server with a short grace window for lifecycle tests.
    pub async fn with_grace_ms(grace_ms: u64) -> Self {
        let mut config = BeaconConfig::default();
        config.timing.grace_period_ms = grace_ms;
        Self::from_config(config).await
    }

    /// Start a test server requiring a bearer token.
    pub async fn with_token(token: &str) -> Self {
        let mut config = BeaconConfig::default();
        config.auth.bearer_token = Some(token.to_string());
        Self::from_config(config).await
    }

    pub async fn from_config(config: BeaconConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _server: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage on a WS stream.
pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Read the next ServerMessage from a WS stream (5s timeout).
pub async fn ws_read(stream: &mut WsStream) -> ServerMessage {
    ws_try_read(stream, 5000)
        .await
        .expect("Timed out waiting for WebSocket message")
}

/// Try to read the next ServerMessage, returning None on timeout.
pub async fn ws_try_read(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return decode_server_message(&data).unwrap();
                },
                Some(Ok(Message::Close(_))) | None => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read frames, skipping non-matching ones, until `pick` returns a value.
/// Panics after 5s without a match.
pub async fn ws_read_until<F, T>(stream: &mut WsStream, mut pick: F) -> T
where
    F: FnMut(ServerMessage) -> Option<T>,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let msg = ws_read(stream).await;
            if let Some(value) = pick(msg) {
                return value;
            }
        }
    })
    .await
    .expect("Timed out waiting for matching WebSocket message")
}

/// Drain every frame that arrives within `window_ms` of silence.
pub async fn ws_drain(stream: &mut WsStream, window_ms: u64) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Some(msg) = ws_try_read(stream, window_ms).await {
        frames.push(msg);
    }
    frames
}

/// Open a connection and complete the hello handshake. Consumes the
/// "Connected to server successfully!" notice.
pub async fn connect_client(
    server: &TestServer,
    username: Option<&str>,
    class: ClientClass,
) -> WsStream {
    connect_client_with_token(server, username, class, None).await
}

pub async fn connect_client_with_token(
    server: &TestServer,
    username: Option<&str>,
    class: ClientClass,
    token: Option<&str>,
) -> WsStream {
    let mut stream = ws_connect(&server.ws_url()).await;
    ws_send(
        &mut stream,
        &ClientMessage::Hello(HelloMsg {
            username: username.map(str::to_string),
            client_class: class,
            token: token.map(str::to_string),
            protocol_version: PROTOCOL_VERSION,
        }),
    )
    .await;

    let notice = ws_read(&mut stream).await;
    match notice {
        ServerMessage::Chat(m) => {
            assert!(m.is_system(), "Expected system notice, got: {m:?}");
            assert_eq!(m.body, "Connected to server successfully!");
        },
        other => panic!("Expected connect notice, got: {other:?}"),
    }
    stream
}

/// Join a room and consume the standard join traffic: the history batch,
/// the presence update, and the personal welcome notice. Returns the
/// history and the presence list.
pub async fn join_room(stream: &mut WsStream, room: &str) -> (HistoryMsg, RoomDataMsg) {
    ws_send(
        stream,
        &ClientMessage::Join(JoinMsg {
            room: room.to_string(),
        }),
    )
    .await;

    let history = match ws_read(stream).await {
        ServerMessage::History(h) => h,
        other => panic!("Expected History first after join, got: {other:?}"),
    };

    let room_data = match ws_read(stream).await {
        ServerMessage::RoomData(r) => r,
        other => panic!("Expected RoomData after history, got: {other:?}"),
    };

    let welcome = ws_read(stream).await;
    match welcome {
        ServerMessage::Chat(m) if m.is_system() => {
            assert!(
                m.body.starts_with(&format!("Welcome to {room}")),
                "Unexpected welcome notice: {}",
                m.body
            );
        },
        other => panic!("Expected welcome notice, got: {other:?}"),
    }

    (history, room_data)
}

/// Send a Publish with an ack token.
pub async fn publish(stream: &mut WsStream, room: &str, body: &str, ack_token: u32) {
    ws_send(
        stream,
        &ClientMessage::Publish(PublishMsg {
            room: room.to_string(),
            body: body.to_string(),
            ack_token: Some(ack_token),
        }),
    )
    .await;
}
