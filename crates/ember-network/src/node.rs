//! Node orchestrator.
//!
//! Owns the global control loops: the balance loop keeping the peer
//! count within bounds, the accept loop for inbound connections, and
//! the per-peer dispatch tasks that classify incoming messages. Public
//! entry points are [`Node::send`], [`Node::broadcast`], [`Node::peers`],
//! [`Node::connect`] and [`Node::shutdown`].

use crate::book::{AddressFilter, Book, SampleSort};
use crate::channel::FramedChannel;
use crate::codec::Codec;
use crate::handshake;
use crate::peer::{self, PeerHandle, QUEUE_CAPACITY};
use crate::registry::Registry;
use crate::{Event, Message, NetworkConfig, NetworkError, NetworkResult, NONCE_LENGTH};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Number of addresses shared in reply to a discovery request.
const GOSSIP_SAMPLE_SIZE: usize = 10;

/// Our own node on the peer-to-peer overlay.
///
/// Manages the peers we are connected to and surfaces everything the
/// network layer does not handle itself to the subscriber channel.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    nonce: [u8; NONCE_LENGTH],
    config: NetworkConfig,
    book: Arc<dyn Book>,
    codec: Arc<dyn Codec>,
    subscriber: mpsc::Sender<Event>,
    registry: Registry,
    count: AtomicI32,
    stalled_events: AtomicU64,
    last_discovery: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Node {
    /// Start a node: blacklist our own address in the book, bind the
    /// listener when server mode is on, and launch the control loops.
    ///
    /// A listener bind failure is the one startup error surfaced to the
    /// caller; everything later is recovered per peer.
    pub async fn new(
        config: NetworkConfig,
        book: Arc<dyn Book>,
        codec: Arc<dyn Codec>,
        subscriber: mpsc::Sender<Event>,
    ) -> NetworkResult<Self> {
        let nonce: [u8; NONCE_LENGTH] = rand::random();
        book.blacklist(&config.address);

        let listener = if config.server {
            Some(TcpListener::bind(&config.address).await?)
        } else {
            None
        };

        let inner = Arc::new(NodeInner {
            nonce,
            config,
            book,
            codec,
            subscriber,
            registry: Registry::new(),
            count: AtomicI32::new(0),
            stalled_events: AtomicU64::new(0),
            last_discovery: Mutex::new(None),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        info!(
            address = %inner.config.address,
            nonce = %hex::encode(nonce),
            "node starting"
        );

        if let Some(listener) = listener {
            let node = inner.clone();
            inner.tracker.spawn(async move { node.accept_loop(listener).await });
        }
        let node = inner.clone();
        inner.tracker.spawn(async move { node.balance_loop().await });

        Ok(Self { inner })
    }

    /// The configured local address.
    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    /// Send a message to the peer with the given address.
    ///
    /// Non-blocking: a full outgoing queue disconnects the stalling peer
    /// and fails with [`NetworkError::Stalled`].
    pub fn send(&self, addr: &str, message: Message) -> NetworkResult<()> {
        self.inner.send(addr, message)
    }

    /// Broadcast a message to all connected peers.
    ///
    /// The first stalling peer is disconnected and aborts the broadcast.
    pub fn broadcast(&self, message: Message) -> NetworkResult<()> {
        self.inner.broadcast(message)
    }

    /// Addresses of all currently connected peers.
    pub fn peers(&self) -> Vec<String> {
        self.inner.registry.addresses()
    }

    /// Number of events dropped because the subscriber channel was full.
    ///
    /// Delivery stays non-blocking; this counter is how a slow subscriber
    /// finds out it has been losing events.
    pub fn stalled_events(&self) -> u64 {
        self.inner.stalled_events.load(Ordering::Relaxed)
    }

    /// Dial an address and run the outgoing handshake on a new task.
    pub fn connect(&self, addr: &str) {
        self.inner.clone().add_target(addr.to_string());
    }

    /// Disconnect the peer with the given address, if registered.
    pub fn disconnect(&self, addr: &str) {
        self.inner.disconnect(addr);
    }

    /// Cooperative shutdown: stop the control loops, close every peer's
    /// channels and wait for all tasks to finish.
    pub async fn shutdown(&self) {
        info!("node shutting down");
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("node stopped");
    }
}

impl NodeInner {
    /// Balance loop: keep the attempt-plus-peer count within bounds.
    async fn balance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.balance);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let count = self.count.load(Ordering::SeqCst).max(0) as usize;
                    if count < self.config.min_peers {
                        self.clone().add_peer();
                    }
                    if count > self.config.max_peers {
                        self.remove_peer();
                    }
                }
            }
        }
        debug!("balance loop stopped");
    }

    /// Pick the best idle address from the book and dial it; with no
    /// candidate available, fall through to discovery.
    fn add_peer(self: Arc<Self>) {
        let sampled = self
            .book
            .sample(1, AddressFilter::IsActive(false), SampleSort::ByPriority);
        let addr = match sampled {
            Ok(mut addrs) => addrs.remove(0),
            Err(_) => {
                self.discover_peers();
                return;
            }
        };
        self.add_target(addr);
    }

    fn add_target(self: Arc<Self>, addr: String) {
        if self.registry.has(&addr) {
            debug!(addr = %addr, "already connected to peer");
            return;
        }
        let node = self.clone();
        self.tracker.spawn(async move { node.connect_outbound(addr).await });
    }

    /// Broadcast a discovery request, at most once per discovery period.
    fn discover_peers(&self) {
        {
            let mut last = self.last_discovery.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.config.discovery {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        info!("launching peer discovery");
        if let Err(e) = self.broadcast(Message::Discover) {
            debug!(error = %e, "could not launch discovery");
        }
    }

    /// Drop one uniformly random peer.
    fn remove_peer(&self) {
        let peers = self.registry.slice();
        if peers.is_empty() {
            return;
        }
        let index = rand::thread_rng().gen_range(0..peers.len());
        self.disconnect(&peers[index].addr);
    }

    /// Dial and run the outgoing handshake.
    async fn connect_outbound(self: Arc<Self>, addr: String) {
        info!(addr = %addr, "adding outgoing peer");
        let mut stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %addr, error = %e, "could not dial peer");
                self.book.failed(&addr);
                return;
            }
        };
        self.count.fetch_add(1, Ordering::SeqCst);

        let accepted = handshake::outbound(
            &mut stream,
            &self.config.network,
            &self.nonce,
            &self.registry,
        )
        .await;
        match accepted {
            Ok(nonce) => {
                if let Err(e) = self.clone().promote(stream, nonce).await {
                    warn!(addr = %addr, error = %e, "could not promote outgoing peer");
                    self.count.fetch_sub(1, Ordering::SeqCst);
                    self.book.dropped(&addr);
                }
            }
            Err(e) => {
                // A remote that refuses the handshake closes without a
                // reply, so the dialer may only observe the hangup;
                // blacklist either way to prevent an immediate redial.
                warn!(addr = %addr, error = %e, "dropping invalid outgoing connection");
                self.count.fetch_sub(1, Ordering::SeqCst);
                self.book.dropped(&addr);
                self.book.blacklist(&addr);
            }
        }
    }

    /// Accept loop with a short deadline per iteration so shutdown is
    /// observed promptly.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        info!(address = %self.config.address, "listening for incoming peers");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(self.config.interval, listener.accept()) => {
                    match result {
                        // Deadline lapsed without a connection; iterate.
                        Err(_) => continue,
                        Ok(Ok((stream, addr))) => {
                            debug!(addr = %addr, "incoming connection");
                            let node = self.clone();
                            self.tracker.spawn(async move {
                                node.accept_inbound(stream).await;
                            });
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "could not accept connection");
                        }
                    }
                }
            }
        }
        info!("accept loop stopped");
    }

    /// Run the incoming handshake and promote on success.
    async fn accept_inbound(self: Arc<Self>, mut stream: TcpStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
        let accepted = handshake::inbound(
            &mut stream,
            &self.config.network,
            &self.nonce,
            &self.registry,
            self.config.max_peers,
        )
        .await;
        match accepted {
            Ok(nonce) => {
                if let Err(e) = self.clone().promote(stream, nonce).await {
                    warn!(error = %e, "could not promote incoming peer");
                    self.count.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping invalid incoming connection");
                self.count.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Register the peer and start its session tasks. Insertion is
    /// atomic: a concurrent session for the same address or nonce makes
    /// this fail and the connection is dropped.
    async fn promote(self: Arc<Self>, stream: TcpStream, nonce: [u8; NONCE_LENGTH]) -> NetworkResult<()> {
        let addr = stream.peer_addr()?.to_string();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = self.cancel.child_token();

        let handle = PeerHandle::new(addr.clone(), nonce, outgoing_tx, cancel.clone());
        self.registry.add(handle)?;
        self.book.add(&addr);
        self.book.connected(&addr);

        let channel = FramedChannel::new(stream, self.codec.clone(), self.config.timeout);
        let (sink, stream) = channel.split();
        self.tracker.spawn(peer::send_loop(
            sink,
            outgoing_rx,
            self.config.heartbeat,
            self.config.timeout,
            cancel.clone(),
            addr.clone(),
        ));

        if self.config.server {
            // Seed the remote's book with our dialable address.
            let share = Message::Peers {
                addresses: vec![self.config.address.clone()],
            };
            if let Err(e) = self.send(&addr, share) {
                warn!(addr = %addr, error = %e, "could not share own address");
            }
        }

        // Announce the peer before its receive path starts, so the
        // subscriber sees `Connected` ahead of any of its messages.
        info!(addr = %addr, nonce = %hex::encode(nonce), "peer connected");
        self.publish(Event::Connected {
            address: addr.clone(),
        });

        self.tracker.spawn(peer::receive_loop(
            stream,
            incoming_tx,
            cancel.clone(),
            addr.clone(),
        ));
        let node = self.clone();
        self.tracker.spawn(async move {
            node.dispatch(addr, incoming_rx, cancel).await;
        });
        Ok(())
    }

    /// Service one peer's incoming queue until the receive loop closes
    /// it, which is the authoritative disconnect signal. Cancellation
    /// stops dispatch immediately so no message event trails the
    /// disconnect.
    async fn dispatch(
        self: Arc<Self>,
        addr: String,
        mut incoming: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = incoming.recv() => {
                    let Some(message) = maybe else { break };
                    self.process(&addr, message);
                }
            }
        }
        self.disconnect(&addr);
    }

    /// Classify one incoming message: handle the overlay-internal ones,
    /// uplift everything else to the subscriber.
    fn process(&self, addr: &str, message: Message) {
        debug!(addr = %addr, msg = ?message.message_type(), "processing message");
        match message {
            Message::Ping { nonce } => {
                if let Err(e) = self.send(addr, Message::Pong { nonce }) {
                    warn!(addr = %addr, error = %e, "could not send ping reply");
                }
            }
            Message::Pong { .. } => {}
            Message::Discover => {
                let sampled =
                    self.book
                        .sample(GOSSIP_SAMPLE_SIZE, AddressFilter::Any, SampleSort::Random);
                match sampled {
                    Ok(addresses) => {
                        if let Err(e) = self.send(addr, Message::Peers { addresses }) {
                            warn!(addr = %addr, error = %e, "could not share address sample");
                        }
                    }
                    Err(e) => debug!(error = %e, "could not get address sample"),
                }
            }
            Message::Peers { addresses } => {
                for peer_addr in &addresses {
                    self.book.add(peer_addr);
                    if self.registry.has(peer_addr) {
                        self.book.connected(peer_addr);
                    }
                }
            }
            other => self.publish(Event::Message {
                address: addr.to_string(),
                message: other,
            }),
        }
    }

    fn send(&self, addr: &str, message: Message) -> NetworkResult<()> {
        let Some(handle) = self.registry.get(addr) else {
            return Err(NetworkError::NotConnected(addr.to_string()));
        };
        if handle.try_send(message).is_err() {
            self.book.failed(addr);
            self.disconnect(addr);
            return Err(NetworkError::Stalled(addr.to_string()));
        }
        Ok(())
    }

    fn broadcast(&self, message: Message) -> NetworkResult<()> {
        for handle in self.registry.slice() {
            if handle.try_send(message.clone()).is_err() {
                self.book.failed(&handle.addr);
                self.disconnect(&handle.addr);
                return Err(NetworkError::Stalled(handle.addr.clone()));
            }
        }
        Ok(())
    }

    /// Remove a peer: unregister, stop its tasks, record the drop in the
    /// book and emit the event. Safe to call more than once.
    fn disconnect(&self, addr: &str) {
        let Some(handle) = self.registry.remove(addr) else {
            return;
        };
        info!(addr = %addr, "disconnecting peer");
        handle.close();
        self.book.dropped(addr);
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.publish(Event::Disconnected {
            address: addr.to_string(),
        });
    }

    /// Non-blocking event delivery; a full subscriber drops the event
    /// and the stall is counted.
    fn publish(&self, event: Event) {
        if self.subscriber.try_send(event).is_err() {
            self.stalled_events.fetch_add(1, Ordering::Relaxed);
            let err = NetworkError::SubscriberStalled;
            warn!(error = %err, "event dropped");
        }
    }
}
