use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use beacon_core::client::{ClientClass, Presence, RoomUser, guest_name};

/// Per-client sender for outbound WebSocket binary frames.
/// Bounded to keep a slow client from exhausting memory; `Bytes` makes
/// cloning cheap when one frame fans out to many clients.
pub type ClientSender = mpsc::Sender<Bytes>;

/// A connected client as tracked by the registry.
#[derive(Debug)]
pub struct ClientEntry {
    pub connection_id: String,
    pub display_name: String,
    pub class: ClientClass,
    pub presence: Presence,
    /// Current room, if joined. One room at a time.
    pub room: Option<String>,
    pub last_heartbeat_at: Option<Instant>,
    pub last_latency_ms: Option<u64>,
    sender: ClientSender,
}

impl ClientEntry {
    pub fn sender(&self) -> &ClientSender {
        &self.sender
    }
}

/// Registry of live connections. Plain map plus a handful of operations;
/// the owning broker serializes access.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry for a new connection. An empty or missing identity
    /// hint gets a generated guest name.
    pub fn register(
        &mut self,
        connection_id: &str,
        display_name: Option<&str>,
        class: ClientClass,
        sender: ClientSender,
    ) -> &ClientEntry {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guest_name(connection_id));

        tracing::info!(connection_id, username = %name, ?class, "Client connected");

        self.clients
            .entry(connection_id.to_string())
            .or_insert(ClientEntry {
                connection_id: connection_id.to_string(),
                display_name: name,
                class,
                presence: Presence::Online,
                room: None,
                last_heartbeat_at: None,
                last_latency_ms: None,
                sender,
            })
    }

    pub fn get(&self, connection_id: &str) -> Option<&ClientEntry> {
        self.clients.get(connection_id)
    }

    /// Set the current room, returning the previous one. The outer `None`
    /// means the connection is unknown (already disconnected). This is the
    /// sole mutation path for membership and enforces one-room-at-a-time.
    pub fn set_room(&mut self, connection_id: &str, room_id: &str) -> Option<Option<String>> {
        let entry = self.clients.get_mut(connection_id)?;
        Some(entry.room.replace(room_id.to_string()))
    }

    /// Update presence. Unknown connections are ignored, never an error.
    pub fn set_presence(&mut self, connection_id: &str, presence: Presence) {
        if let Some(entry) = self.clients.get_mut(connection_id) {
            entry.presence = presence;
        }
    }

    /// Record a heartbeat response.
    pub fn touch_heartbeat(&mut self, connection_id: &str, latency_ms: u64) {
        if let Some(entry) = self.clients.get_mut(connection_id) {
            entry.last_heartbeat_at = Some(Instant::now());
            entry.last_latency_ms = Some(latency_ms);
        }
    }

    /// Remove and return the entry. Safe to call twice; the second call is
    /// a no-op (grace-period eviction can race a reconnect).
    pub fn unregister(&mut self, connection_id: &str) -> Option<ClientEntry> {
        self.clients.remove(connection_id)
    }

    /// Snapshot of the clients currently in a room, sorted by display name.
    /// Linear scan; fine at tens to low hundreds of clients per process.
    pub fn list_in_room(&self, room_id: &str) -> Vec<RoomUser> {
        let mut users: Vec<RoomUser> = self
            .clients
            .values()
            .filter(|c| c.room.as_deref() == Some(room_id))
            .map(|c| RoomUser {
                connection_id: c.connection_id.clone(),
                display_name: c.display_name.clone(),
                presence: c.presence,
            })
            .collect();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        users
    }

    /// Whether a different live connection already carries this identity.
    pub fn has_other_with_name(&self, display_name: &str, excluding_id: &str) -> bool {
        self.clients
            .values()
            .any(|c| c.display_name == display_name && c.connection_id != excluding_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientEntry> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
