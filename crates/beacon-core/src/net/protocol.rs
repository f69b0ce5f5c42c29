use serde::{Deserialize, Serialize};

use super::messages::{
    AppStateMsg, HelloMsg, HistoryMsg, HistoryTailMsg, JoinMsg, MessageType, PingMsg, PongMsg,
    PublishAckMsg, PublishMsg, RoomDataMsg, TypingMsg, UserTypingMsg,
};
use super::messages::{ClientMessage, ServerMessage};
use crate::message::ChatMessage;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::Hello(m) => encode_message(MessageType::Hello, m),
        ClientMessage::Join(m) => encode_message(MessageType::Join, m),
        ClientMessage::Publish(m) => encode_message(MessageType::Publish, m),
        ClientMessage::Typing(m) => encode_message(MessageType::Typing, m),
        ClientMessage::AppState(m) => encode_message(MessageType::AppState, m),
        ClientMessage::Pong(m) => encode_message(MessageType::Pong, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::Chat(m) => encode_message(MessageType::Chat, m),
        ServerMessage::History(m) => encode_message(MessageType::History, m),
        ServerMessage::HistoryTail(m) => encode_message(MessageType::HistoryTail, m),
        ServerMessage::RoomData(m) => encode_message(MessageType::RoomData, m),
        ServerMessage::UserTyping(m) => encode_message(MessageType::UserTyping, m),
        ServerMessage::PublishAck(m) => encode_message(MessageType::PublishAck, m),
        ServerMessage::Ping(m) => encode_message(MessageType::Ping, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Hello => Ok(ClientMessage::Hello(decode_payload::<HelloMsg>(data)?)),
        MessageType::Join => Ok(ClientMessage::Join(decode_payload::<JoinMsg>(data)?)),
        MessageType::Publish => Ok(ClientMessage::Publish(decode_payload::<PublishMsg>(data)?)),
        MessageType::Typing => Ok(ClientMessage::Typing(decode_payload::<TypingMsg>(data)?)),
        MessageType::AppState => Ok(ClientMessage::AppState(decode_payload::<AppStateMsg>(
            data,
        )?)),
        MessageType::Pong => Ok(ClientMessage::Pong(decode_payload::<PongMsg>(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Chat => Ok(ServerMessage::Chat(decode_payload::<ChatMessage>(data)?)),
        MessageType::History => Ok(ServerMessage::History(decode_payload::<HistoryMsg>(data)?)),
        MessageType::HistoryTail => Ok(ServerMessage::HistoryTail(decode_payload::<
            HistoryTailMsg,
        >(data)?)),
        MessageType::RoomData => Ok(ServerMessage::RoomData(decode_payload::<RoomDataMsg>(
            data,
        )?)),
        MessageType::UserTyping => Ok(ServerMessage::UserTyping(decode_payload::<UserTypingMsg>(
            data,
        )?)),
        MessageType::PublishAck => Ok(ServerMessage::PublishAck(decode_payload::<PublishAckMsg>(
            data,
        )?)),
        MessageType::Ping => Ok(ServerMessage::Ping(decode_payload::<PingMsg>(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
