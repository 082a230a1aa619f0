//! Overlay protocol messages.

use crate::NetworkError;
use serde::{Deserialize, Serialize};

/// Message type identifiers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Heartbeat request.
    Ping = 0,
    /// Heartbeat reply.
    Pong = 1,
    /// Request for known peer addresses.
    Discover = 2,
    /// Reply carrying peer addresses.
    Peers = 3,
    /// Application payload: UTF-8 text.
    Text = 4,
    /// Application payload: raw bytes.
    Blob = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Ping),
            1 => Ok(MessageType::Pong),
            2 => Ok(MessageType::Discover),
            3 => Ok(MessageType::Peers),
            4 => Ok(MessageType::Text),
            5 => Ok(MessageType::Blob),
            _ => Err(NetworkError::Codec(format!(
                "unknown message type: {}",
                value
            ))),
        }
    }
}

/// A message exchanged between peers.
///
/// `Ping`, `Pong`, `Discover` and `Peers` are handled by the network layer
/// itself; `Text` and `Blob` are forwarded to the subscriber untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Heartbeat request with a random nonce.
    Ping { nonce: u32 },
    /// Heartbeat reply echoing the ping nonce.
    Pong { nonce: u32 },
    /// Request for a sample of known peer addresses.
    Discover,
    /// A sample of peer addresses known to the sender.
    Peers { addresses: Vec<String> },
    /// Application payload: UTF-8 text.
    Text(String),
    /// Application payload: raw bytes.
    Blob(Vec<u8>),
}

impl Message {
    /// Wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping { .. } => MessageType::Ping,
            Message::Pong { .. } => MessageType::Pong,
            Message::Discover => MessageType::Discover,
            Message::Peers { .. } => MessageType::Peers,
            Message::Text(_) => MessageType::Text,
            Message::Blob(_) => MessageType::Blob,
        }
    }

    /// Whether this message is consumed by the network layer itself.
    pub fn is_internal(&self) -> bool {
        !matches!(self, Message::Text(_) | Message::Blob(_))
    }
}
