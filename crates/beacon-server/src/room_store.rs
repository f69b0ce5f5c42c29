use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use beacon_core::message::ChatMessage;

use crate::config::DefaultRoom;

/// Most recent messages retained per room. Oldest are evicted first.
pub const HISTORY_LIMIT: usize = 100;

/// A named channel with bounded message history.
#[derive(Debug)]
pub struct Room {
    pub display_name: String,
    history: VecDeque<ChatMessage>,
}

impl Room {
    fn new(display_name: String, welcome: ChatMessage) -> Self {
        let mut history = VecDeque::new();
        history.push_back(welcome);
        Self {
            display_name,
            history,
        }
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }
}

/// Directory entry for the room listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub display_name: String,
    pub message_count: usize,
}

/// In-memory room directory. Rooms are created implicitly on first join and
/// live for the rest of the process. Callers synchronize access; this struct
/// does no locking of its own.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<String, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create configured rooms at startup. Existing ids are left alone.
    pub fn seed(&mut self, defaults: &[DefaultRoom]) {
        for room in defaults {
            if !self.rooms.contains_key(&room.id) {
                let welcome = ChatMessage::system(&room.welcome, &room.id);
                self.rooms
                    .insert(room.id.clone(), Room::new(room.display_name.clone(), welcome));
            }
        }
    }

    fn ensure(&mut self, room_id: &str) -> &mut Room {
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            tracing::info!(room = room_id, "Creating new room");
            let welcome = ChatMessage::system(&format!("Welcome to {room_id}!"), room_id);
            Room::new(room_id.to_string(), welcome)
        })
    }

    /// Return the room, creating it with a single welcome message if absent.
    pub fn get_or_create(&mut self, room_id: &str) -> &Room {
        self.ensure(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Append to history, truncating from the front once over the limit.
    pub fn append(&mut self, room_id: &str, message: ChatMessage) {
        let room = self.ensure(room_id);
        room.history.push_back(message);
        while room.history.len() > HISTORY_LIMIT {
            room.history.pop_front();
        }
    }

    /// Snapshot of a room's history, most recent `limit` entries when given.
    /// Unknown rooms read as empty.
    pub fn history(&self, room_id: &str, limit: Option<usize>) -> Vec<ChatMessage> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let len = room.history.len();
        let skip = match limit {
            Some(n) if n < len => len - n,
            _ => 0,
        };
        room.history.iter().skip(skip).cloned().collect()
    }

    pub fn display_name(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).map(|r| r.display_name.clone())
    }

    /// Directory listing, sorted by id for stable output.
    pub fn list(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(id, room)| RoomSummary {
                id: id.clone(),
                display_name: room.display_name.clone(),
                message_count: room.message_count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_creates_room_with_one_welcome_message() {
        let mut store = RoomStore::new();
        store.get_or_create("general");

        let history = store.history("general", None);
        assert_eq!(history.len(), 1);
        assert!(history[0].is_system());
        assert_eq!(history[0].body, "Welcome to general!");
        assert_eq!(history[0].room, "general");
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut store = RoomStore::new();
        store.get_or_create("general");
        store.append("general", ChatMessage::user("alice", "hi", "general"));
        store.get_or_create("general");

        assert_eq!(store.len(), 1);
        assert_eq!(store.history("general", None).len(), 2);
    }

    #[test]
    fn history_is_bounded_to_limit_in_arrival_order() {
        let mut store = RoomStore::new();
        store.get_or_create("busy");
        // 101 publishes on top of the welcome message
        for i in 1..=101 {
            store.append("busy", ChatMessage::user("alice", &format!("msg {i}"), "busy"));
        }

        let history = store.history("busy", None);
        assert_eq!(history.len(), HISTORY_LIMIT);
        // Welcome and the 1st publish were evicted; the 2nd..=101st remain
        assert_eq!(history[0].body, "msg 2");
        assert_eq!(history[99].body, "msg 101");
    }

    #[test]
    fn history_limit_returns_most_recent() {
        let mut store = RoomStore::new();
        store.get_or_create("general");
        for i in 1..=5 {
            store.append(
                "general",
                ChatMessage::user("alice", &format!("msg {i}"), "general"),
            );
        }

        let recent = store.history("general", Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].body, "msg 4");
        assert_eq!(recent[1].body, "msg 5");

        // A limit larger than the history returns everything
        assert_eq!(store.history("general", Some(50)).len(), 6);
    }

    #[test]
    fn unknown_room_reads_as_empty() {
        let store = RoomStore::new();
        assert!(store.history("nowhere", None).is_empty());
        assert!(store.display_name("nowhere").is_none());
        assert!(!store.contains("nowhere"));
    }

    #[test]
    fn seeded_rooms_keep_configured_names() {
        let mut store = RoomStore::new();
        store.seed(&[DefaultRoom {
            id: "general".to_string(),
            display_name: "General Chat".to_string(),
            welcome: "Welcome to the General Chat!".to_string(),
        }]);

        assert_eq!(store.display_name("general").as_deref(), Some("General Chat"));
        let history = store.history("general", None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "Welcome to the General Chat!");

        // Seeding again must not reset history
        store.append("general", ChatMessage::user("alice", "hi", "general"));
        store.seed(&[DefaultRoom {
            id: "general".to_string(),
            display_name: "General Chat".to_string(),
            welcome: "Welcome to the General Chat!".to_string(),
        }]);
        assert_eq!(store.history("general", None).len(), 2);
    }

    #[test]
    fn list_reports_counts_sorted_by_id() {
        let mut store = RoomStore::new();
        store.get_or_create("zulu");
        store.get_or_create("alpha");
        store.append("alpha", ChatMessage::user("alice", "hi", "alpha"));

        let listing = store.list();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].id, "alpha");
        assert_eq!(listing[0].message_count, 2);
        assert_eq!(listing[1].id, "zulu");
        assert_eq!(listing[1].message_count, 1);
    }
}
