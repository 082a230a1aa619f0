//! Per-peer session: handle, receive loop and send loop.
//!
//! Each registered peer owns two tasks. The receive loop decodes frames
//! into the bounded `incoming` queue and exits on any read failure; the
//! dropped queue sender is the authoritative signal that the peer is
//! gone. The send loop drains the bounded `outgoing` queue and fires a
//! heartbeat ping whenever the peer has been quiet for one heartbeat
//! period.

use crate::channel::{ChannelSink, ChannelStream};
use crate::{Message, NetworkError, NetworkResult, NONCE_LENGTH};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the per-peer `outgoing` and `incoming` queues.
pub const QUEUE_CAPACITY: usize = 16;

/// Handle to a live peer, owned by the registry.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Remote address as reported by the socket.
    pub addr: String,
    /// Nonce the remote advertised during the handshake.
    pub nonce: [u8; NONCE_LENGTH],
    outgoing: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl PeerHandle {
    /// Create a handle around the peer's outgoing queue and stop signal.
    pub(crate) fn new(
        addr: String,
        nonce: [u8; NONCE_LENGTH],
        outgoing: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            nonce,
            outgoing,
            cancel,
        }
    }

    /// Non-blocking enqueue on the peer's outgoing queue.
    pub(crate) fn try_send(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.outgoing.try_send(message)
    }

    /// Stop the peer's tasks. Idempotent; the socket closes once both
    /// loop halves have observed the signal and dropped their stream
    /// halves.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Write one message with the configured deadline.
async fn transmit(
    sink: &mut ChannelSink,
    message: Message,
    timeout: Duration,
) -> NetworkResult<()> {
    tokio::time::timeout(timeout, sink.send(message))
        .await
        .map_err(|_| NetworkError::Timeout(timeout))?
}

/// Send loop: drains `outgoing` and heartbeats on the side.
///
/// Exits when the queue closes, a write fails or times out, or the peer
/// is cancelled. Any write failure leaves the socket half dropped, which
/// the receive loop observes as EOF.
pub(crate) async fn send_loop(
    mut sink: ChannelSink,
    mut outgoing: mpsc::Receiver<Message>,
    heartbeat: Duration,
    timeout: Duration,
    cancel: CancellationToken,
    addr: String,
) {
    let start = tokio::time::Instant::now() + heartbeat;
    let mut ticker = tokio::time::interval_at(start, heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            maybe = outgoing.recv() => {
                let Some(message) = maybe else { break };
                if let Err(e) = transmit(&mut sink, message, timeout).await {
                    warn!(addr = %addr, error = %e, "send failed");
                    break;
                }
            }

            _ = ticker.tick() => {
                let ping = Message::Ping { nonce: rand::random() };
                debug!(addr = %addr, "pinging peer");
                if let Err(e) = transmit(&mut sink, ping, timeout).await {
                    warn!(addr = %addr, error = %e, "heartbeat failed");
                    break;
                }
            }
        }
    }
    cancel.cancel();
    debug!(addr = %addr, "send loop stopped");
}

/// Receive loop: decodes frames into the bounded `incoming` queue.
///
/// Exits on decode error, socket error, EOF or cancellation; dropping
/// `incoming` on exit closes the queue, which the orchestrator takes as
/// the disconnect trigger.
pub(crate) async fn receive_loop(
    mut stream: ChannelStream,
    incoming: mpsc::Sender<Message>,
    cancel: CancellationToken,
    addr: String,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            next = stream.next() => {
                match next {
                    Some(Ok(message)) => {
                        if incoming.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(addr = %addr, error = %e, "receive failed");
                        break;
                    }
                    None => {
                        debug!(addr = %addr, "connection closed by peer");
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
    debug!(addr = %addr, "receive loop stopped");
}
