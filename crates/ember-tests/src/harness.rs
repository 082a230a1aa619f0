//! Test harness for integration tests.
//!
//! Provides in-process overlay nodes on ephemeral ports, an event
//! collector per node, and a hand-driven peer for exercising the wire
//! protocol directly.

use ember_network::{
    Event, FramedChannel, Message, NetworkConfig, Node, SimpleBook, SimpleCodec, NONCE_LENGTH,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Magic used by most scenarios.
pub const TEST_MAGIC: [u8; 4] = [0xAA, 0xAA, 0xAA, 0xAA];

/// A different overlay, for mismatch scenarios.
pub const OTHER_MAGIC: [u8; 4] = [0xBB, 0xBB, 0xBB, 0xBB];

/// Reserve a concrete loopback address for a node to bind.
pub async fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// One in-process node plus its event stream and book.
pub struct TestNode {
    pub node: Node,
    pub book: Arc<SimpleBook>,
    pub events: mpsc::Receiver<Event>,
    pub address: String,
}

impl TestNode {
    /// Start a server-mode node with test-friendly timings.
    pub async fn start(magic: &[u8]) -> Self {
        Self::start_tuned(magic, |_| {}).await
    }

    /// Start a node after applying scenario-specific overrides.
    pub async fn start_tuned(magic: &[u8], tune: impl FnOnce(&mut NetworkConfig)) -> Self {
        let address = free_address().await;
        let mut config = NetworkConfig {
            address: address.clone(),
            network: magic.to_vec(),
            server: true,
            // Quiet by default: scenarios drive connections explicitly.
            min_peers: 0,
            max_peers: 8,
            balance: Duration::from_millis(50),
            heartbeat: Duration::from_secs(10),
            timeout: Duration::from_secs(1),
            discovery: Duration::from_millis(100),
            interval: Duration::from_millis(20),
        };
        tune(&mut config);

        let book = Arc::new(SimpleBook::new());
        let (event_tx, events) = mpsc::channel(256);
        let node = Node::new(
            config,
            book.clone(),
            Arc::new(SimpleCodec::new()),
            event_tx,
        )
        .await
        .expect("failed to start test node");

        Self {
            node,
            book,
            events,
            address,
        }
    }

    /// Dial another test node.
    pub fn connect_to(&self, other: &TestNode) {
        self.node.connect(&other.address);
    }

    /// Next event within the deadline, if any arrives.
    pub async fn next_event(&mut self, within: Duration) -> Option<Event> {
        tokio::time::timeout(within, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for a `Connected` event and return the peer address.
    pub async fn await_connected(&mut self, within: Duration) -> String {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("no Connected event before deadline");
            if let Some(Event::Connected { address }) = self.next_event(remaining).await {
                return address;
            }
        }
    }

    /// Wait for a `Disconnected` event and return the peer address.
    pub async fn await_disconnected(&mut self, within: Duration) -> String {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("no Disconnected event before deadline");
            if let Some(Event::Disconnected { address }) = self.next_event(remaining).await {
                return address;
            }
        }
    }

    /// Wait for an application message from a peer.
    pub async fn await_message(&mut self, within: Duration) -> (String, Message) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("no Message event before deadline");
            if let Some(Event::Message { address, message }) = self.next_event(remaining).await {
                return (address, message);
            }
        }
    }

    /// Assert that no `Connected` event arrives within the window.
    pub async fn assert_no_connection(&mut self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while let Some(remaining) =
            deadline.checked_duration_since(tokio::time::Instant::now())
        {
            match self.next_event(remaining).await {
                Some(Event::Connected { address }) => {
                    panic!("unexpected connection to {}", address)
                }
                Some(_) => continue,
                None => return,
            }
        }
    }
}

/// Poll a condition until it holds or the deadline lapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", within);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A hand-driven remote peer speaking the wire protocol directly.
pub struct ManualPeer {
    channel: FramedChannel,
    pub nonce: [u8; NONCE_LENGTH],
}

impl ManualPeer {
    /// Dial a node and complete the handshake with a random nonce.
    pub async fn connect(target: &str, magic: &[u8]) -> std::io::Result<Self> {
        Self::connect_with_nonce(target, magic, rand::random()).await
    }

    /// Dial a node advertising a chosen nonce.
    pub async fn connect_with_nonce(
        target: &str,
        magic: &[u8],
        nonce: [u8; NONCE_LENGTH],
    ) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(target).await?;

        let mut syn = Vec::with_capacity(magic.len() + NONCE_LENGTH);
        syn.extend_from_slice(magic);
        syn.extend_from_slice(&nonce);
        stream.write_all(&syn).await?;
        stream.flush().await?;

        let mut ack = vec![0u8; magic.len() + NONCE_LENGTH];
        stream.read_exact(&mut ack).await?;

        let channel = FramedChannel::new(
            stream,
            Arc::new(SimpleCodec::new()),
            Duration::from_secs(1),
        );
        Ok(Self { channel, nonce })
    }

    /// Send one message to the node.
    pub async fn send(&mut self, message: Message) {
        self.channel.send(message).await.expect("manual send failed");
    }

    /// Receive the next message within the deadline.
    pub async fn recv(&mut self, within: Duration) -> Option<Message> {
        match tokio::time::timeout(within, self.channel.recv()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }
}
