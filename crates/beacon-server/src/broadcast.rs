use std::collections::HashMap;

use bytes::Bytes;
use tokio::task::AbortHandle;

use beacon_core::client::{ClientClass, Presence};
use beacon_core::message::ChatMessage;
use beacon_core::net::messages::{HistoryMsg, RoomDataMsg, ServerMessage, UserTypingMsg};
use beacon_core::net::protocol::encode_server_message;

use crate::config::DefaultRoom;
use crate::registry::{ClientRegistry, ClientSender};
use crate::room_store::RoomStore;

/// Why a publish was rejected. Reported only to the sender.
#[derive(Debug, PartialEq, Eq)]
pub enum PublishError {
    /// Body was empty after trimming.
    InvalidMessage,
    /// Sender's current room does not match the target room.
    NotInRoom { room: String },
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMessage => write!(f, "message body must not be empty"),
            Self::NotInRoom { room } => {
                write!(f, "you must join the room \"{room}\" before sending messages")
            },
        }
    }
}

impl std::error::Error for PublishError {}

/// Why a join was rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinError {
    EmptyRoom,
    /// Connection vanished before the join was processed.
    UnknownConnection,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRoom => write!(f, "room name is required"),
            Self::UnknownConnection => write!(f, "connection is no longer registered"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub room: String,
    pub previous_room: Option<String>,
    /// Older history withheld from the first batch for constrained clients.
    /// The lifecycle layer delivers it after a short delay.
    pub tail: Vec<ChatMessage>,
}

/// Disconnected constrained client whose membership is provisionally kept.
#[derive(Debug)]
struct GraceHold {
    display_name: String,
    timer: Option<AbortHandle>,
}

/// The broker owns the room store and client registry exclusively. Every
/// mutation in the process goes through a method here, under the single
/// `Arc<RwLock<Broker>>` in `AppState`, which serializes publishes and
/// membership changes (server-arrival order within a room).
pub struct Broker {
    rooms: RoomStore,
    clients: ClientRegistry,
    pending_grace: HashMap<String, GraceHold>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            rooms: RoomStore::new(),
            clients: ClientRegistry::new(),
            pending_grace: HashMap::new(),
        }
    }

    pub fn with_rooms(defaults: &[DefaultRoom]) -> Self {
        let mut broker = Self::new();
        broker.rooms.seed(defaults);
        broker
    }

    /// Read-only view for listing/history endpoints.
    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    /// Read-only view for presence/health endpoints.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    // ---- connection bookkeeping ----

    /// Register a connection. Returns the resolved display name.
    pub fn register_client(
        &mut self,
        connection_id: &str,
        username: Option<&str>,
        class: ClientClass,
        sender: ClientSender,
    ) -> String {
        self.clients
            .register(connection_id, username, class, sender)
            .display_name
            .clone()
    }

    pub fn client_room(&self, connection_id: &str) -> Option<String> {
        self.clients.get(connection_id)?.room.clone()
    }

    pub fn client_class(&self, connection_id: &str) -> Option<ClientClass> {
        self.clients.get(connection_id).map(|c| c.class)
    }

    pub fn set_presence(&mut self, connection_id: &str, presence: Presence) {
        self.clients.set_presence(connection_id, presence);
    }

    pub fn touch_heartbeat(&mut self, connection_id: &str, latency_ms: u64) {
        self.clients.touch_heartbeat(connection_id, latency_ms);
    }

    // ---- join ----

    /// Join a room: ensure it exists, move membership (leaving any previous
    /// room), deliver bounded history to the requester only, update presence
    /// lists of the vacated and joined rooms, and greet the requester.
    pub fn join(
        &mut self,
        connection_id: &str,
        room_id: &str,
        constrained_batch: usize,
    ) -> Result<JoinOutcome, JoinError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(JoinError::EmptyRoom);
        }

        let Some(entry) = self.clients.get(connection_id) else {
            return Err(JoinError::UnknownConnection);
        };
        let class = entry.class;
        let name = entry.display_name.clone();

        self.rooms.get_or_create(room_id);

        // Room exists before membership is recorded, so a member's current
        // room always resolves in the store.
        let previous = self
            .clients
            .set_room(connection_id, room_id)
            .ok_or(JoinError::UnknownConnection)?;

        tracing::info!(
            connection_id,
            username = %name,
            room = room_id,
            previous = previous.as_deref(),
            "Client joined room"
        );

        let full = self.rooms.history(room_id, None);
        let (batch, tail) = match class {
            ClientClass::Constrained if full.len() > constrained_batch => {
                let split = full.len() - constrained_batch;
                (full[split..].to_vec(), full[..split].to_vec())
            },
            _ => (full, Vec::new()),
        };
        self.send_to(
            connection_id,
            &ServerMessage::History(HistoryMsg {
                room: room_id.to_string(),
                messages: batch,
            }),
        );

        if let Some(prev) = previous.as_deref()
            && prev != room_id
        {
            self.broadcast_room_data(prev);
        }
        self.broadcast_room_data(room_id);

        self.send_system_to(
            connection_id,
            room_id,
            &format!("Welcome to {room_id}, {name}!"),
        );

        Ok(JoinOutcome {
            room: room_id.to_string(),
            previous_room: previous,
            tail,
        })
    }

    // ---- publish ----

    /// Publish a chat message to a room. The sender must currently be joined
    /// to that room; this holds even though identity itself is unverified.
    /// On success the message is appended to history first, then delivered:
    /// one direct copy to the sender, one copy to every other member. The
    /// sender is excluded from the member sweep explicitly so it can never
    /// be double-delivered.
    pub fn publish(
        &mut self,
        room_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ChatMessage, PublishError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(PublishError::InvalidMessage);
        }

        let Some(sender) = self.clients.get(sender_id) else {
            return Err(PublishError::NotInRoom {
                room: room_id.to_string(),
            });
        };
        if sender.room.as_deref() != Some(room_id) {
            tracing::warn!(
                connection_id = sender_id,
                username = %sender.display_name,
                room = room_id,
                "Publish to unjoined room rejected"
            );
            return Err(PublishError::NotInRoom {
                room: room_id.to_string(),
            });
        }

        let message = ChatMessage::user(&sender.display_name, body, room_id);
        self.rooms.append(room_id, message.clone());

        tracing::info!(
            connection_id = sender_id,
            username = %message.sender,
            room = room_id,
            message_id = %message.id,
            "Message published"
        );

        if let Some(frame) = encode(&ServerMessage::Chat(message.clone())) {
            self.deliver(sender_id, frame.clone());
            for user in self.clients.list_in_room(room_id) {
                if user.connection_id != sender_id {
                    self.deliver(&user.connection_id, frame.clone());
                }
            }
        }

        Ok(message)
    }

    /// Append a broker-authored message to history and deliver it to every
    /// member of the room. Used where there is no active sender ("left the
    /// chat" notices).
    pub fn append_system(&mut self, room_id: &str, text: &str) -> ChatMessage {
        let message = ChatMessage::system(text, room_id);
        self.rooms.append(room_id, message.clone());
        if let Some(frame) = encode(&ServerMessage::Chat(message.clone())) {
            for user in self.clients.list_in_room(room_id) {
                self.deliver(&user.connection_id, frame.clone());
            }
        }
        message
    }

    /// Direct-only system notice (errors, greetings). Never stored.
    pub fn send_system_to(&self, connection_id: &str, room: &str, text: &str) {
        self.send_to(
            connection_id,
            &ServerMessage::Chat(ChatMessage::system(text, room)),
        );
    }

    /// Send the most recent `limit` messages of a room to one connection.
    pub fn send_history_to(&self, connection_id: &str, room_id: &str, limit: Option<usize>) {
        let messages = self.rooms.history(room_id, limit);
        self.send_to(
            connection_id,
            &ServerMessage::History(HistoryMsg {
                room: room_id.to_string(),
                messages,
            }),
        );
    }

    /// Presence list to every member of the room.
    pub fn broadcast_room_data(&self, room_id: &str) {
        let users = self.clients.list_in_room(room_id);
        let msg = ServerMessage::RoomData(RoomDataMsg {
            room: room_id.to_string(),
            users,
        });
        if let Some(frame) = encode(&msg) {
            for user in self.clients.list_in_room(room_id) {
                self.deliver(&user.connection_id, frame.clone());
            }
        }
    }

    /// Relay a typing signal to the other members of the sender's room.
    /// Not stored in history.
    pub fn forward_typing(&self, connection_id: &str, is_typing: bool) {
        let Some(entry) = self.clients.get(connection_id) else {
            return;
        };
        let Some(room) = entry.room.as_deref() else {
            return;
        };
        let msg = ServerMessage::UserTyping(UserTypingMsg {
            user: entry.display_name.clone(),
            is_typing,
        });
        if let Some(frame) = encode(&msg) {
            for user in self.clients.list_in_room(room) {
                if user.connection_id != connection_id {
                    self.deliver(&user.connection_id, frame.clone());
                }
            }
        }
    }

    /// Encode and send one frame to one connection.
    pub fn send_to(&self, connection_id: &str, msg: &ServerMessage) {
        if let Some(frame) = encode(msg) {
            self.deliver(connection_id, frame);
        }
    }

    /// Heartbeat probe. Returns false when the connection is gone so the
    /// caller's ticker can stop.
    pub fn send_ping_to(&self, connection_id: &str, sent_at_ms: u64) -> bool {
        if self.clients.get(connection_id).is_none() {
            return false;
        }
        self.send_to(
            connection_id,
            &ServerMessage::Ping(beacon_core::net::messages::PingMsg { sent_at_ms }),
        );
        true
    }

    fn deliver(&self, connection_id: &str, frame: Bytes) {
        if let Some(entry) = self.clients.get(connection_id)
            && entry.sender().try_send(frame).is_err()
        {
            tracing::debug!(
                connection_id,
                "Skipping delivery to slow or closed client"
            );
        }
    }

    // ---- grace-period bookkeeping ----

    /// Park a disconnected constrained client. Its registry entry (and room
    /// membership) stays until the grace window closes or a reconnect
    /// reclaims it. Returns false when the connection is already gone.
    pub fn park_for_grace(&mut self, connection_id: &str) -> bool {
        let Some(entry) = self.clients.get(connection_id) else {
            return false;
        };
        tracing::info!(
            connection_id,
            username = %entry.display_name,
            "Transport lost, holding membership for grace window"
        );
        self.pending_grace.insert(
            connection_id.to_string(),
            GraceHold {
                display_name: entry.display_name.clone(),
                timer: None,
            },
        );
        true
    }

    /// Attach the abortable eviction timer to a parked connection.
    pub fn attach_grace_timer(&mut self, connection_id: &str, timer: AbortHandle) {
        match self.pending_grace.get_mut(connection_id) {
            Some(hold) => hold.timer = Some(timer),
            // Hold vanished between park and spawn; stop the timer.
            None => timer.abort(),
        }
    }

    /// A new connection carries an identity that is parked in grace: cancel
    /// the timer and drop the stale entry silently. No "left the chat" is
    /// ever emitted for the original connection. Returns the stale id.
    pub fn reclaim_grace(&mut self, display_name: &str, new_connection_id: &str) -> Option<String> {
        let stale_id = self
            .pending_grace
            .iter()
            .find(|(id, hold)| {
                hold.display_name == display_name && id.as_str() != new_connection_id
            })
            .map(|(id, _)| id.clone())?;

        let hold = self.pending_grace.remove(&stale_id)?;
        if let Some(timer) = hold.timer {
            timer.abort();
        }
        self.clients.unregister(&stale_id);
        tracing::info!(
            stale_connection_id = %stale_id,
            new_connection_id,
            username = display_name,
            "Client reconnected within grace window"
        );
        Some(stale_id)
    }

    /// Grace timer fired. If the identity re-registered under a new
    /// connection while the timer ran, the stale entry is dropped silently;
    /// otherwise the client is evicted with a "left the chat" notice.
    pub fn finish_grace(&mut self, connection_id: &str) {
        let Some(hold) = self.pending_grace.remove(connection_id) else {
            return;
        };
        if self
            .clients
            .has_other_with_name(&hold.display_name, connection_id)
        {
            let stale = self.clients.unregister(connection_id);
            tracing::info!(
                connection_id,
                username = %hold.display_name,
                "Grace window closed after reconnect, stale entry dropped"
            );
            if let Some(room) = stale.and_then(|e| e.room) {
                self.broadcast_room_data(&room);
            }
            return;
        }
        self.evict_inner(connection_id);
    }

    /// Remove a connection immediately, aborting any grace timer first.
    pub fn evict(&mut self, connection_id: &str) {
        if let Some(hold) = self.pending_grace.remove(connection_id)
            && let Some(timer) = hold.timer
        {
            timer.abort();
        }
        self.evict_inner(connection_id);
    }

    fn evict_inner(&mut self, connection_id: &str) {
        let Some(entry) = self.clients.unregister(connection_id) else {
            return;
        };
        tracing::info!(
            connection_id,
            username = %entry.display_name,
            "Client evicted"
        );
        if let Some(room) = entry.room {
            self.append_system(&room, &format!("{} has left the chat", entry.display_name));
            self.broadcast_room_data(&room);
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Bytes> {
    match encode_server_message(msg) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server message");
            None
        },
    }
}
