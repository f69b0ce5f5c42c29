use serde::{Deserialize, Serialize};

use crate::client::{AppPhase, ClientClass, RoomUser};
use crate::message::ChatMessage;

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    Hello = 0x01,
    Join = 0x02,
    Publish = 0x03,
    Typing = 0x04,
    AppState = 0x05,
    Pong = 0x06,

    // Server -> Client
    Chat = 0x10,
    History = 0x11,
    HistoryTail = 0x12,
    RoomData = 0x13,
    UserTyping = 0x14,
    PublishAck = 0x15,
    Ping = 0x16,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Join),
            0x03 => Some(Self::Publish),
            0x04 => Some(Self::Typing),
            0x05 => Some(Self::AppState),
            0x06 => Some(Self::Pong),
            0x10 => Some(Self::Chat),
            0x11 => Some(Self::History),
            0x12 => Some(Self::HistoryTail),
            0x13 => Some(Self::RoomData),
            0x14 => Some(Self::UserTyping),
            0x15 => Some(Self::PublishAck),
            0x16 => Some(Self::Ping),
            _ => None,
        }
    }
}

/// First frame on every connection. Carries the identity hint, the transport
/// class, and the optional bearer string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMsg {
    pub username: Option<String>,
    pub client_class: ClientClass,
    pub token: Option<String>,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMsg {
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMsg {
    pub room: String,
    pub body: String,
    /// When set, the server answers with a PublishAck echoing this token.
    pub ack_token: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingMsg {
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateMsg {
    pub state: AppPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMsg {
    pub sent_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMsg {
    pub room: String,
    pub messages: Vec<ChatMessage>,
}

/// Older remainder of a room's history, sent to constrained clients after
/// the recent batch so a lossy transport is never handed one large frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTailMsg {
    pub room: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDataMsg {
    pub room: String,
    pub users: Vec<RoomUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTypingMsg {
    pub user: String,
    pub is_typing: bool,
}

/// Publish acknowledgement. Exactly one is sent per Publish that carried an
/// ack token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAckMsg {
    pub success: bool,
    pub id: Option<String>,
    pub room: Option<String>,
    pub timestamp_ms: Option<u64>,
    pub error: Option<String>,
    pub ack_token: Option<u32>,
}

impl PublishAckMsg {
    pub fn ok(id: String, room: String, timestamp_ms: u64, ack_token: Option<u32>) -> Self {
        Self {
            success: true,
            id: Some(id),
            room: Some(room),
            timestamp_ms: Some(timestamp_ms),
            error: None,
            ack_token,
        }
    }

    pub fn err(error: String, ack_token: Option<u32>) -> Self {
        Self {
            success: false,
            id: None,
            room: None,
            timestamp_ms: None,
            error: Some(error),
            ack_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMsg {
    pub sent_at_ms: u64,
}

/// Messages a client may send to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Hello(HelloMsg),
    Join(JoinMsg),
    Publish(PublishMsg),
    Typing(TypingMsg),
    AppState(AppStateMsg),
    Pong(PongMsg),
}

/// Messages the broker may send to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Chat(ChatMessage),
    History(HistoryMsg),
    HistoryTail(HistoryTailMsg),
    RoomData(RoomDataMsg),
    UserTyping(UserTypingMsg),
    PublishAck(PublishAckMsg),
    Ping(PingMsg),
}
