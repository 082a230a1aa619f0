//! Message serialization.
//!
//! A codec turns one [`Message`] into the body of a wire frame and back:
//! a single type-tag byte followed by the payload encoding. The framing
//! layer around it guarantees that `decode` always sees exactly one
//! complete frame body.

use crate::{Message, MessageType, NetworkError, NetworkResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Serializes and deserializes messages for the wire.
///
/// Implementations must be deterministic: encoding the same message twice
/// produces the same bytes.
pub trait Codec: Send + Sync + 'static {
    /// Encode a message into `dst`: type tag first, payload after.
    fn encode(&self, message: &Message, dst: &mut BytesMut) -> NetworkResult<()>;

    /// Decode one message from a complete frame body.
    fn decode(&self, src: Bytes) -> NetworkResult<Message>;
}

/// Default codec: one type-tag byte followed by a JSON payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCodec;

impl SimpleCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

fn json_error(err: serde_json::Error) -> NetworkError {
    NetworkError::Codec(err.to_string())
}

impl Codec for SimpleCodec {
    fn encode(&self, message: &Message, dst: &mut BytesMut) -> NetworkResult<()> {
        dst.put_u8(message.message_type() as u8);
        let writer = dst.writer();
        match message {
            Message::Ping { nonce } => serde_json::to_writer(writer, nonce),
            Message::Pong { nonce } => serde_json::to_writer(writer, nonce),
            Message::Discover => serde_json::to_writer(writer, &()),
            Message::Peers { addresses } => serde_json::to_writer(writer, addresses),
            Message::Text(text) => serde_json::to_writer(writer, text),
            Message::Blob(data) => serde_json::to_writer(writer, data),
        }
        .map_err(json_error)
    }

    fn decode(&self, src: Bytes) -> NetworkResult<Message> {
        if src.is_empty() {
            return Err(NetworkError::Codec("empty frame body".to_string()));
        }
        let tag = MessageType::try_from(src[0])?;
        let body = &src[1..];
        let message = match tag {
            MessageType::Ping => Message::Ping {
                nonce: serde_json::from_slice(body).map_err(json_error)?,
            },
            MessageType::Pong => Message::Pong {
                nonce: serde_json::from_slice(body).map_err(json_error)?,
            },
            MessageType::Discover => {
                serde_json::from_slice::<()>(body).map_err(json_error)?;
                Message::Discover
            }
            MessageType::Peers => Message::Peers {
                addresses: serde_json::from_slice(body).map_err(json_error)?,
            },
            MessageType::Text => Message::Text(serde_json::from_slice(body).map_err(json_error)?),
            MessageType::Blob => Message::Blob(serde_json::from_slice(body).map_err(json_error)?),
        };
        Ok(message)
    }
}
