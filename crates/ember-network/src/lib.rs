//! # ember-network
//!
//! P2P overlay networking layer for the Ember blockchain node.
//!
//! This crate provides:
//! - TCP connection lifecycle management with an identity handshake
//! - A bounded, self-balancing active peer set with heartbeating
//! - An address book scoring candidates for outbound selection and gossip
//! - Length-prefixed, LZ4-compressed message framing

mod book;
mod channel;
mod codec;
mod config;
mod error;
mod event;
mod handshake;
mod message;
mod node;
mod peer;
mod registry;

pub use book::{AddressFilter, Book, EntryState, SampleSort, SimpleBook};
pub use channel::{FramedChannel, WireCodec, MAX_FRAME_SIZE};
pub use codec::{Codec, SimpleCodec};
pub use config::NetworkConfig;
pub use error::{NetworkError, NetworkResult, RejectReason};
pub use event::Event;
pub use message::{Message, MessageType};
pub use node::Node;
pub use peer::{PeerHandle, QUEUE_CAPACITY};
pub use registry::Registry;

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 9650;

/// Overlay magic bytes for mainnet.
pub const MAINNET_MAGIC: [u8; 4] = [0x65, 0x6d, 0x62, 0x01];

/// Overlay magic bytes for testnet.
pub const TESTNET_MAGIC: [u8; 4] = [0x65, 0x6d, 0x62, 0x02];

/// Length of the per-instance nonce exchanged during the handshake.
pub const NONCE_LENGTH: usize = 16;
