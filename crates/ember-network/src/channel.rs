//! Framed wire channel.
//!
//! Wire format, per frame:
//!
//! ```text
//! +----------+------------------------------------+
//! |  Length  |        LZ4 block (size-prepended)  |
//! | 4 bytes  |  tag byte + payload, compressed    |
//! +----------+------------------------------------+
//! ```
//!
//! Each frame holds exactly one codec-encoded message, compressed as one
//! LZ4 block in each direction. [`MAX_FRAME_SIZE`] bounds both the
//! compressed bytes on the wire and the decompressed body: the block's
//! own size prefix is remote input, so it is checked before any buffer
//! is allocated for it.

use crate::{Codec, Message, NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Length-prefix size.
const HEADER_SIZE: usize = 4;

/// Maximum frame size, compressed and decompressed alike.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MB

pub(crate) type ChannelSink = SplitSink<Framed<TcpStream, WireCodec>, Message>;
pub(crate) type ChannelStream = SplitStream<Framed<TcpStream, WireCodec>>;

/// Frame codec: length prefix around an LZ4-compressed message encoding.
pub struct WireCodec {
    codec: Arc<dyn Codec>,
    max_frame: usize,
    scratch: BytesMut,
}

impl WireCodec {
    /// Create a frame codec around a message codec.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            max_frame: MAX_FRAME_SIZE,
            scratch: BytesMut::new(),
        }
    }
}

impl Encoder<Message> for WireCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.scratch.clear();
        self.codec.encode(&item, &mut self.scratch)?;

        // The peer bounds the decompressed size by the same limit.
        if self.scratch.len() > self.max_frame {
            return Err(NetworkError::Codec(format!(
                "message too large: {} bytes",
                self.scratch.len()
            )));
        }

        let compressed = compress_prepend_size(&self.scratch);
        if compressed.len() > self.max_frame {
            return Err(NetworkError::Codec(format!(
                "frame too large: {} bytes",
                compressed.len()
            )));
        }

        dst.reserve(HEADER_SIZE + compressed.len());
        dst.put_u32(compressed.len() as u32);
        dst.put_slice(&compressed);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame {
            return Err(NetworkError::Codec(format!(
                "frame too large: {} bytes",
                length
            )));
        }

        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let compressed = src.split_to(length);

        // The block's embedded size prefix is remote input: a tiny frame
        // can claim a multi-gigabyte decompressed size, and lz4 would
        // allocate for the claim before decoding a single byte. Bound it
        // before decompressing.
        if compressed.len() < 4 {
            return Err(NetworkError::Codec("truncated block".to_string()));
        }
        let claimed = u32::from_le_bytes([
            compressed[0],
            compressed[1],
            compressed[2],
            compressed[3],
        ]) as usize;
        if claimed > self.max_frame {
            return Err(NetworkError::Codec(format!(
                "decompressed frame too large: {} bytes",
                claimed
            )));
        }

        let body = decompress_size_prepended(&compressed)
            .map_err(|e| NetworkError::Codec(e.to_string()))?;

        self.codec.decode(Bytes::from(body)).map(Some)
    }
}

/// Duplex stream of messages over one TCP connection.
pub struct FramedChannel {
    inner: Framed<TcpStream, WireCodec>,
    timeout: Duration,
}

impl FramedChannel {
    /// Wrap a connection whose handshake has already completed.
    pub fn new(stream: TcpStream, codec: Arc<dyn Codec>, timeout: Duration) -> Self {
        Self {
            inner: Framed::new(stream, WireCodec::new(codec)),
            timeout,
        }
    }

    /// Encode and write one message, bounded by the send deadline.
    pub async fn send(&mut self, message: Message) -> NetworkResult<()> {
        tokio::time::timeout(self.timeout, self.inner.send(message))
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout))?
    }

    /// Read and decode the next message. `None` means EOF.
    pub async fn recv(&mut self) -> Option<NetworkResult<Message>> {
        self.inner.next().await
    }

    /// Split into the halves owned by the send and receive loops.
    pub(crate) fn split(self) -> (ChannelSink, ChannelStream) {
        self.inner.split()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleCodec;

    fn wire_codec() -> WireCodec {
        WireCodec::new(Arc::new(SimpleCodec::new()))
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = wire_codec();
        let message = Message::Peers {
            addresses: vec!["127.0.0.1:9650".to_string()],
        };

        let mut buf = BytesMut::new();
        codec.encode(message.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, message);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::Ping { nonce: 7 }, &mut buf)
            .unwrap();

        // Feed the frame one byte short of complete.
        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.put_u8(full[full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_corrupt_block_rejected() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        // Plausible size prefix, garbage compressed contents.
        buf.put_u32(6);
        buf.put_slice(&4u32.to_le_bytes());
        buf.put_slice(&[0xFF, 0xFF]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decompression_bomb_rejected() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        // A tiny frame whose embedded size prefix claims ~4 GB.
        let mut block = Vec::new();
        block.extend_from_slice(&u32::MAX.to_le_bytes());
        block.extend_from_slice(&[0x00; 8]);
        buf.put_u32(block.len() as u32);
        buf.put_slice(&block);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        // Frame shorter than the block's own size prefix.
        buf.put_u32(2);
        buf.put_slice(&[0x01, 0x02]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_message_rejected_on_encode() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        // The JSON body of a frame-sized blob exceeds the frame limit.
        let blob = Message::Blob(vec![0u8; MAX_FRAME_SIZE]);
        assert!(codec.encode(blob, &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = wire_codec();
        let mut buf = BytesMut::new();
        codec.encode(Message::Ping { nonce: 1 }, &mut buf).unwrap();
        codec.encode(Message::Pong { nonce: 2 }, &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Message::Ping { nonce: 1 }
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Message::Pong { nonce: 2 }
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let codec: Arc<dyn Codec> = Arc::new(SimpleCodec::new());

        let server_codec = codec.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel =
                FramedChannel::new(stream, server_codec, Duration::from_secs(1));
            channel.recv().await.unwrap().unwrap()
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut channel = FramedChannel::new(stream, codec, Duration::from_secs(1));
        channel
            .send(Message::Text("over the wire".to_string()))
            .await
            .unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, Message::Text("over the wire".to_string()));
    }
}
