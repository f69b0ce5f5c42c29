use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_core::message::ChatMessage;
use beacon_core::net::messages::{ClientMessage, ServerMessage};
use beacon_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_client_message, encode_server_message,
};

use crate::auth::token_matches;
use crate::lifecycle::{self, ConnectionFsm};
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The first frame must be a Hello.
    let first = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };
    let Ok(ClientMessage::Hello(hello)) = decode_client_message(&first) else {
        return;
    };

    // Protocol version 0 means "unversioned client", accepted for now.
    if hello.protocol_version != 0 && hello.protocol_version != PROTOCOL_VERSION {
        send_notice(
            &mut ws_sender,
            &format!(
                "Error: protocol version mismatch: client={}, server={PROTOCOL_VERSION}",
                hello.protocol_version
            ),
        )
        .await;
        return;
    }

    if !token_matches(&state.config.auth.bearer_token, &hello.token) {
        tracing::warn!("Rejected connection with invalid token");
        send_notice(&mut ws_sender, "Error: invalid token").await;
        return;
    }

    let connection_id = Uuid::new_v4().to_string();
    let class = hello.client_class;
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.client_buffer);

    let display_name = {
        let mut broker = state.broker.write().await;
        let name = broker.register_client(&connection_id, hello.username.as_deref(), class, tx);
        // Identity parked in a grace window? Reclaim it silently.
        broker.reclaim_grace(&name, &connection_id);
        broker.send_system_to(&connection_id, "", "Connected to server successfully!");
        name
    };

    let mut fsm = ConnectionFsm::new();
    fsm.handshake_complete();

    spawn_writer(ws_sender, rx);
    let heartbeat = lifecycle::spawn_heartbeat(state.clone(), connection_id.clone(), class);

    read_loop(&mut ws_receiver, &state, &connection_id, &mut fsm).await;

    heartbeat.abort();
    let policy = fsm.transport_lost(class);
    lifecycle::handle_disconnect(&state, &connection_id, policy, "transport closed").await;

    tracing::info!(
        connection_id,
        username = %display_name,
        "Connection closed"
    );
}

/// Send a system notice directly on the sink, for rejections that happen
/// before the connection has a registry entry.
async fn send_notice(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    text: &str,
) {
    let msg = ServerMessage::Chat(ChatMessage::system(text, ""));
    if let Ok(data) = encode_server_message(&msg)
        && let Err(e) = ws_sender.send(Message::Binary(data.into())).await
    {
        tracing::warn!(error = %e, "Failed to send rejection notice");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    connection_id: &str,
    fsm: &mut ConnectionFsm,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(connection_id, "Rate limited");
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let decoded = match decode_client_message(&data) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(connection_id, error = %e, "Undecodable frame skipped");
                continue;
            },
        };

        match decoded {
            ClientMessage::Hello(_) => {
                tracing::warn!(connection_id, "Duplicate hello ignored");
            },
            ClientMessage::Join(join) => {
                if let Some(room) = lifecycle::handle_join(state, connection_id, &join.room).await
                {
                    fsm.joined(&room);
                }
            },
            ClientMessage::Publish(publish) => {
                lifecycle::handle_publish(state, connection_id, &publish).await;
            },
            ClientMessage::Typing(typing) => {
                let broker = state.broker.read().await;
                broker.forward_typing(connection_id, typing.is_typing);
            },
            ClientMessage::AppState(app_state) => {
                lifecycle::handle_app_state(state, connection_id, app_state.state).await;
            },
            ClientMessage::Pong(pong) => {
                lifecycle::handle_pong(state, connection_id, pong.sent_at_ms).await;
            },
        }
    }
}
