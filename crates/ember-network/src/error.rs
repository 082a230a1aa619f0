//! Network error types.

use thiserror::Error;

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The remote advertised a different network magic.
    MagicMismatch,
    /// The remote advertised our own nonce.
    SelfConnect,
    /// A peer with the advertised nonce is already registered.
    DuplicateNonce,
    /// A peer session for the same address already exists.
    DuplicateAddress,
    /// The registry is already at `max_peers`.
    CapacityReached,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::MagicMismatch => "network magic mismatch",
            RejectReason::SelfConnect => "connection to self",
            RejectReason::DuplicateNonce => "duplicate peer nonce",
            RejectReason::DuplicateAddress => "duplicate peer address",
            RejectReason::CapacityReached => "peer capacity reached",
        };
        write!(f, "{}", reason)
    }
}

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Malformed or unknown message on the wire.
    #[error("Codec failure: {0}")]
    Codec(String),

    /// Socket read/write/accept failure.
    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// Handshake refused.
    #[error("Handshake rejected: {0}")]
    HandshakeReject(RejectReason),

    /// The peer's outbound queue is full.
    #[error("Peer stalling: {0}")]
    Stalled(String),

    /// No candidate address matched the sampler's filter.
    #[error("Address book empty")]
    BookEmpty,

    /// Attempted send to an address that is not registered.
    #[error("Not connected to peer: {0}")]
    NotConnected(String),

    /// The subscriber channel is full; the event was dropped.
    #[error("Subscriber stalling")]
    SubscriberStalled,

    /// A write exceeded the configured deadline.
    #[error("Write timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
