//! Network configuration.

use crate::{DEFAULT_PORT, MAINNET_MAGIC};
use std::time::Duration;

/// Configuration of the overlay node.
///
/// A plain value: `Default` is the named factory for the standard
/// parameters, and every field can be overridden before the node is
/// constructed.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Local advertised address; bound for listening in server mode and
    /// blacklisted in the book to prevent self-dials.
    pub address: String,
    /// Magic bytes partitioning the overlay network.
    pub network: Vec<u8>,
    /// Whether to accept inbound connections.
    pub server: bool,
    /// Lower bound on the peer count the balance loop maintains.
    pub min_peers: usize,
    /// Upper bound on the peer count the balance loop maintains.
    pub max_peers: usize,
    /// Period of the balance loop.
    pub balance: Duration,
    /// Per-peer ping period.
    pub heartbeat: Duration,
    /// Per-send write deadline.
    pub timeout: Duration,
    /// Minimum period between discovery broadcasts.
    pub discovery: Duration,
    /// Accept-loop deadline granularity.
    pub interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            network: MAINNET_MAGIC.to_vec(),
            server: false,
            min_peers: 3,
            max_peers: 10,
            balance: Duration::from_secs(1),
            heartbeat: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            discovery: Duration::from_secs(30),
            interval: Duration::from_millis(50),
        }
    }
}
