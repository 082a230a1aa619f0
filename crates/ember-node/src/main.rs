//! Ember Node - overlay networking node for the Ember blockchain.
//!
//! This is the main entry point for the ember-node binary.

use anyhow::Result;
use clap::Parser;
use ember_network::{Event, Node, SimpleBook, SimpleCodec};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::NodeConfig;

/// Capacity of the subscriber channel for uplifted events.
const SUBSCRIBER_CAPACITY: usize = 128;

/// Ember overlay node.
#[derive(Parser, Debug)]
#[command(name = "ember-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ember-node.toml")]
    config: PathBuf,

    /// Network to connect to
    #[arg(short, long, default_value = "mainnet")]
    network: String,

    /// Local advertised address
    #[arg(short, long)]
    address: Option<String>,

    /// Peer addresses to seed the book with
    #[arg(short, long)]
    peers: Vec<String>,

    /// Do not accept inbound connections
    #[arg(long)]
    no_server: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Ember Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;

    info!("Network: {}", config.network);
    info!("Address: {}", config.address);
    info!("Known peers: {}", config.known_peers.len());

    let book = Arc::new(SimpleBook::with_addresses(config.known_peers.clone()));
    let codec = Arc::new(SimpleCodec::new());
    let (event_tx, mut event_rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

    let node = Node::new(config.network_config(), book, codec, event_tx).await?;

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    };
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            maybe = event_rx.recv() => {
                match maybe {
                    Some(event) => report(event),
                    None => break,
                }
            }
            _ = &mut shutdown_signal => {
                node.shutdown().await;
                break;
            }
        }
    }

    info!("Ember node stopped");
    Ok(())
}

/// Log one uplifted event.
fn report(event: Event) {
    match event {
        Event::Connected { address } => info!(addr = %address, "peer connected"),
        Event::Disconnected { address } => info!(addr = %address, "peer disconnected"),
        Event::Message { address, message } => {
            warn!(addr = %address, msg = ?message.message_type(), "unhandled application message");
        }
    }
}
