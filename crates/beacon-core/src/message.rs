use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::time::{epoch_millis, timestamp_now};

/// Sender name reserved for broker-authored messages.
pub const SYSTEM_SENDER: &str = "system";

/// Number of hex chars of the content digest kept in a message id.
const ID_HASH_LEN: usize = 10;

/// A chat message as stored in room history and delivered on the wire.
///
/// The id is derived from arrival time, body, and sender so that a client
/// receiving the same message twice across a reconnect can recognize it.
/// Collisions require identical simultaneous input and are benign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub room: String,
    pub created_at: String,
    /// True only in a client-local optimistic echo. The server never stores
    /// or emits a pending message; the field exists so clients can reuse
    /// this struct for the echo they render before the ack arrives.
    #[serde(default)]
    pub pending: bool,
}

impl ChatMessage {
    /// Build a user message, deriving the id from time, body, and sender.
    pub fn user(sender: &str, body: &str, room: &str) -> Self {
        let millis = epoch_millis();
        Self {
            id: derive_id(millis, body, sender),
            sender: sender.to_string(),
            body: body.to_string(),
            room: room.to_string(),
            created_at: timestamp_now(),
            pending: false,
        }
    }

    /// Build a system message authored by the broker itself.
    pub fn system(text: &str, room: &str) -> Self {
        let millis = epoch_millis();
        Self {
            id: derive_id(millis, text, SYSTEM_SENDER),
            sender: SYSTEM_SENDER.to_string(),
            body: text.to_string(),
            room: room.to_string(),
            created_at: timestamp_now(),
            pending: false,
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Epoch milliseconds encoded in the id prefix.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.id.split_once('-')?.0.parse().ok()
    }
}

/// Derive a message id: `{millis}-{first 10 hex chars of sha256}`.
pub fn derive_id(millis: u64, body: &str, sender: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{millis}-{body}-{sender}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{millis}-{}", &digest[..ID_HASH_LEN])
}
