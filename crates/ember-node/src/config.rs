//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use ember_network::{NetworkConfig, DEFAULT_PORT, MAINNET_MAGIC, TESTNET_MAGIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, used in logs only.
    pub node_name: String,
    /// Network (mainnet, testnet).
    pub network: String,
    /// Local advertised address.
    pub address: String,
    /// Accept inbound connections.
    #[serde(default = "default_true")]
    pub server: bool,
    /// Addresses to seed the book with.
    #[serde(default)]
    pub known_peers: Vec<String>,
    /// Lower bound on the peer count.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
    /// Upper bound on the peer count.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Balance loop period in milliseconds.
    #[serde(default = "default_balance_ms")]
    pub balance_ms: u64,
    /// Heartbeat period in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Send deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum period between discovery broadcasts, in milliseconds.
    #[serde(default = "default_discovery_ms")]
    pub discovery_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_peers() -> usize {
    3
}

fn default_max_peers() -> usize {
    10
}

fn default_balance_ms() -> u64 {
    1_000
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_discovery_ms() -> u64 {
    30_000
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        config.network = args.network.clone();

        // Only override if explicitly provided via CLI
        if let Some(ref address) = args.address {
            config.address = address.clone();
        }
        if !args.peers.is_empty() {
            config.known_peers = args.peers.clone();
        }
        if args.no_server {
            config.server = false;
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        Self {
            node_name: "ember-node".to_string(),
            network: network.to_string(),
            address: format!("0.0.0.0:{}", DEFAULT_PORT),
            server: true,
            known_peers: Vec::new(),
            min_peers: default_min_peers(),
            max_peers: default_max_peers(),
            balance_ms: default_balance_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            timeout_ms: default_timeout_ms(),
            discovery_ms: default_discovery_ms(),
        }
    }

    /// Magic bytes for the configured network.
    pub fn magic(&self) -> Vec<u8> {
        match self.network.as_str() {
            "testnet" => TESTNET_MAGIC.to_vec(),
            _ => MAINNET_MAGIC.to_vec(),
        }
    }

    /// Translate into the network layer's configuration value.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            address: self.address.clone(),
            network: self.magic(),
            server: self.server,
            min_peers: self.min_peers,
            max_peers: self.max_peers,
            balance: Duration::from_millis(self.balance_ms),
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            discovery: Duration::from_millis(self.discovery_ms),
            ..NetworkConfig::default()
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
