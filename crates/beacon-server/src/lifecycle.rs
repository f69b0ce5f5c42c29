use std::time::Duration;

use tokio::task::JoinHandle;

use beacon_core::client::{AppPhase, ClientClass, Presence};
use beacon_core::net::messages::{HistoryTailMsg, PublishAckMsg, PublishMsg, ServerMessage};
use beacon_core::time::epoch_millis;

use crate::state::AppState;

/// Explicit per-connection state machine.
///
/// `Joined` is a sub-state of `Connected` (the `room` field); a connected
/// client is in zero or one room. Invalid transitions are rejected and
/// logged rather than panicking — the transport layer may deliver events
/// in surprising orders around a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFsm {
    Connecting,
    Connected { room: Option<String> },
    PendingGrace { room: Option<String> },
    Evicted,
}

/// What to do with a connection whose transport just dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracePolicy {
    EvictNow,
    Hold,
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFsm {
    pub fn new() -> Self {
        Self::Connecting
    }

    /// Transport handshake succeeded; the registry entry exists.
    pub fn handshake_complete(&mut self) -> bool {
        if *self == Self::Connecting {
            *self = Self::Connected { room: None };
            true
        } else {
            tracing::warn!(state = ?self, "Ignoring handshake in non-connecting state");
            false
        }
    }

    /// A join was accepted. Implicitly leaves any previous room.
    pub fn joined(&mut self, room: &str) -> bool {
        match self {
            Self::Connected { .. } => {
                *self = Self::Connected {
                    room: Some(room.to_string()),
                };
                true
            },
            _ => {
                tracing::warn!(state = ?self, room, "Ignoring join in invalid state");
                false
            },
        }
    }

    /// Transport dropped. Constrained clients are held for the grace
    /// window; standard clients are evicted immediately.
    pub fn transport_lost(&mut self, class: ClientClass) -> GracePolicy {
        let room = self.room().map(str::to_string);
        match (&*self, class) {
            (Self::Connected { .. }, ClientClass::Constrained) => {
                *self = Self::PendingGrace { room };
                GracePolicy::Hold
            },
            _ => {
                *self = Self::Evicted;
                GracePolicy::EvictNow
            },
        }
    }

    /// The same logical client came back within the grace window.
    pub fn reconnected(&mut self) -> bool {
        match self {
            Self::PendingGrace { room } => {
                let room = room.take();
                *self = Self::Connected { room };
                true
            },
            _ => false,
        }
    }

    /// Terminal: the registry entry has been removed.
    pub fn evicted(&mut self) {
        *self = Self::Evicted;
    }

    pub fn room(&self) -> Option<&str> {
        match self {
            Self::Connected { room } | Self::PendingGrace { room } => room.as_deref(),
            _ => None,
        }
    }
}

/// Process a join request. Failures are reported only to the requester as a
/// system notice; other room members never see them. Returns the joined
/// room on success.
pub async fn handle_join(state: &AppState, connection_id: &str, room: &str) -> Option<String> {
    let batch = state.config.timing.constrained_history_batch;
    let outcome = {
        let mut broker = state.broker.write().await;
        match broker.join(connection_id, room, batch) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(connection_id, room, error = %e, "Join failed");
                broker.send_system_to(connection_id, room, &format!("Error joining room: {e}"));
                return None;
            },
        }
    };

    // Constrained clients got only the recent batch; the older remainder
    // follows after a short delay, and only if they are still in the room.
    if !outcome.tail.is_empty() {
        let delay = Duration::from_millis(state.config.timing.history_tail_delay_ms);
        let state = state.clone();
        let connection_id = connection_id.to_string();
        let room = outcome.room.clone();
        let tail = outcome.tail;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let broker = state.broker.read().await;
            if broker.client_room(&connection_id).as_deref() == Some(room.as_str()) {
                broker.send_to(
                    &connection_id,
                    &ServerMessage::HistoryTail(HistoryTailMsg {
                        room,
                        messages: tail,
                    }),
                );
            }
        });
    }

    Some(outcome.room)
}

/// Process a publish request. The ack, when requested, is sent exactly once;
/// errors additionally surface as a system notice to the sender only.
pub async fn handle_publish(state: &AppState, connection_id: &str, publish: &PublishMsg) {
    let max_body = state.config.limits.max_body_bytes;
    let mut broker = state.broker.write().await;

    if publish.body.len() > max_body {
        tracing::warn!(connection_id, room = %publish.room, "Oversized message body rejected");
        let text = format!("message exceeds {max_body} bytes");
        broker.send_system_to(connection_id, &publish.room, &format!("Error: {text}"));
        if publish.ack_token.is_some() {
            broker.send_to(
                connection_id,
                &ServerMessage::PublishAck(PublishAckMsg::err(text, publish.ack_token)),
            );
        }
        return;
    }

    match broker.publish(&publish.room, connection_id, &publish.body) {
        Ok(message) => {
            if publish.ack_token.is_some() {
                let ack = PublishAckMsg::ok(
                    message.id.clone(),
                    message.room.clone(),
                    message.timestamp_ms().unwrap_or_default(),
                    publish.ack_token,
                );
                broker.send_to(connection_id, &ServerMessage::PublishAck(ack));
            }
        },
        Err(e) => {
            broker.send_system_to(connection_id, &publish.room, &format!("Error: {e}"));
            if publish.ack_token.is_some() {
                broker.send_to(
                    connection_id,
                    &ServerMessage::PublishAck(PublishAckMsg::err(
                        e.to_string(),
                        publish.ack_token,
                    )),
                );
            }
        },
    }
}

/// Foreground/background signal. Background marks the client away; returning
/// to the foreground resends recent history to that connection only so it
/// can catch up after transport stalls.
pub async fn handle_app_state(state: &AppState, connection_id: &str, phase: AppPhase) {
    let mut broker = state.broker.write().await;
    match phase {
        AppPhase::Background => {
            broker.set_presence(connection_id, Presence::Away);
            if let Some(room) = broker.client_room(connection_id) {
                broker.broadcast_room_data(&room);
            }
        },
        AppPhase::Active => {
            broker.set_presence(connection_id, Presence::Online);
            if let Some(room) = broker.client_room(connection_id) {
                broker.send_history_to(
                    connection_id,
                    &room,
                    Some(state.config.timing.recovery_history),
                );
                broker.broadcast_room_data(&room);
            }
        },
    }
}

/// Heartbeat response: record liveness and round-trip latency.
pub async fn handle_pong(state: &AppState, connection_id: &str, sent_at_ms: u64) {
    let latency = epoch_millis().saturating_sub(sent_at_ms);
    let mut broker = state.broker.write().await;
    broker.touch_heartbeat(connection_id, latency);
    tracing::debug!(connection_id, latency_ms = latency, "Heartbeat pong");
}

/// Apply the FSM's disconnect policy. `Hold` parks the client and arms an
/// abortable eviction timer; a reconnect cancels it, and the fire path
/// re-checks continuity itself so a lost race never emits a stale "left the
/// chat" notice.
pub async fn handle_disconnect(
    state: &AppState,
    connection_id: &str,
    policy: GracePolicy,
    reason: &str,
) {
    tracing::info!(connection_id, reason, ?policy, "Socket disconnected");
    let mut broker = state.broker.write().await;
    match policy {
        GracePolicy::EvictNow => broker.evict(connection_id),
        GracePolicy::Hold => {
            if broker.park_for_grace(connection_id) {
                let grace = state.config.timing.grace_period();
                let state = state.clone();
                let id = connection_id.to_string();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let mut broker = state.broker.write().await;
                    broker.finish_grace(&id);
                });
                broker.attach_grace_timer(connection_id, timer.abort_handle());
            }
        },
    }
}

/// Periodic liveness probe. Constrained clients are probed more often.
/// Stops on its own once the connection leaves the registry; the socket
/// task also aborts it on disconnect.
pub fn spawn_heartbeat(
    state: AppState,
    connection_id: String,
    class: ClientClass,
) -> JoinHandle<()> {
    let interval = state.config.timing.heartbeat_interval(class);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so probes start
        // one interval after connect.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let broker = state.broker.read().await;
            if !broker.send_ping_to(&connection_id, epoch_millis()) {
                break;
            }
        }
    })
}
