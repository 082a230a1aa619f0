//! Events uplifted to the subscriber.

use crate::Message;

/// Connectivity and message events delivered on the subscriber channel.
///
/// `Connected` is emitted strictly before any message from that peer,
/// `Disconnected` strictly after the last one. Delivery is best-effort:
/// a full subscriber channel drops the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A handshake completed and the peer was registered.
    Connected {
        /// Remote address.
        address: String,
    },
    /// A peer was removed from the registry.
    Disconnected {
        /// Remote address.
        address: String,
    },
    /// An application message arrived from a registered peer.
    Message {
        /// Remote address.
        address: String,
        /// The decoded payload.
        message: Message,
    },
}
