use serde::{Deserialize, Serialize};

/// Coarse online/away status, distinct from raw connection liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Online,
    Away,
}

/// Transport class signaled at connect time. Constrained clients (mobile,
/// lossy transit) get a reconnect grace window and a shorter heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientClass {
    #[default]
    Standard,
    Constrained,
}

/// App foreground/background phase reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppPhase {
    Active,
    Background,
}

/// One entry in a room's presence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUser {
    pub connection_id: String,
    pub display_name: String,
    pub presence: Presence,
}

/// Guest display name derived from a connection id.
pub fn guest_name(connection_id: &str) -> String {
    let prefix: String = connection_id.chars().take(5).collect();
    format!("Guest_{prefix}")
}
