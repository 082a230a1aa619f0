//! Identity handshake.
//!
//! Both directions exchange `magic ‖ nonce` as one fixed-size raw frame
//! before any codec framing starts. The magic partitions otherwise
//! identical overlays; the nonce lets a node detect connections to
//! itself and duplicate connections to the same remote instance.

use crate::error::RejectReason;
use crate::registry::Registry;
use crate::{NetworkError, NetworkResult, NONCE_LENGTH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Validate a received `magic ‖ nonce` frame against the three rejection
/// rules shared by both directions.
fn validate(
    ack: &[u8],
    magic: &[u8],
    local_nonce: &[u8; NONCE_LENGTH],
    registry: &Registry,
) -> NetworkResult<[u8; NONCE_LENGTH]> {
    let (code, nonce_bytes) = ack.split_at(magic.len());
    if code != magic {
        return Err(NetworkError::HandshakeReject(RejectReason::MagicMismatch));
    }
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(nonce_bytes);
    if &nonce == local_nonce {
        return Err(NetworkError::HandshakeReject(RejectReason::SelfConnect));
    }
    if registry.known_nonce(&nonce) {
        return Err(NetworkError::HandshakeReject(RejectReason::DuplicateNonce));
    }
    Ok(nonce)
}

/// Outgoing handshake: write our identity, then check the reply.
///
/// Returns the remote's nonce on success.
pub(crate) async fn outbound(
    stream: &mut TcpStream,
    magic: &[u8],
    local_nonce: &[u8; NONCE_LENGTH],
    registry: &Registry,
) -> NetworkResult<[u8; NONCE_LENGTH]> {
    let mut syn = Vec::with_capacity(magic.len() + NONCE_LENGTH);
    syn.extend_from_slice(magic);
    syn.extend_from_slice(local_nonce);
    stream.write_all(&syn).await?;
    stream.flush().await?;

    let mut ack = vec![0u8; magic.len() + NONCE_LENGTH];
    stream.read_exact(&mut ack).await?;

    let nonce = validate(&ack, magic, local_nonce, registry)?;
    debug!(nonce = %hex::encode(nonce), "outgoing handshake accepted");
    Ok(nonce)
}

/// Incoming handshake: check the remote's identity, then write ours.
///
/// On top of the shared rejection rules, refuses the connection when the
/// registry is already at capacity.
pub(crate) async fn inbound(
    stream: &mut TcpStream,
    magic: &[u8],
    local_nonce: &[u8; NONCE_LENGTH],
    registry: &Registry,
    max_peers: usize,
) -> NetworkResult<[u8; NONCE_LENGTH]> {
    let mut syn = vec![0u8; magic.len() + NONCE_LENGTH];
    stream.read_exact(&mut syn).await?;

    let nonce = validate(&syn, magic, local_nonce, registry)?;
    if registry.count() >= max_peers {
        return Err(NetworkError::HandshakeReject(RejectReason::CapacityReached));
    }

    let mut ack = Vec::with_capacity(magic.len() + NONCE_LENGTH);
    ack.extend_from_slice(magic);
    ack.extend_from_slice(local_nonce);
    stream.write_all(&ack).await?;
    stream.flush().await?;

    debug!(nonce = %hex::encode(nonce), "incoming handshake accepted");
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerHandle;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    const MAGIC: &[u8] = &[0xAA, 0xBB];

    fn nonce(n: u8) -> [u8; NONCE_LENGTH] {
        let mut bytes = [0u8; NONCE_LENGTH];
        bytes[0] = n;
        bytes
    }

    fn registered(registry: &Registry, addr: &str, n: u8) {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        registry
            .add(PeerHandle::new(
                addr.to_string(),
                nonce(n),
                tx,
                CancellationToken::new(),
            ))
            .unwrap();
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let server = async { listener.accept().await.map(|(s, _)| s) };
        let (client, server) = tokio::join!(client, server);
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_both_directions_accept() {
        let (mut client, mut server) = pair().await;
        let dialer = Registry::new();
        let acceptor = Registry::new();

        let server_task = tokio::spawn(async move {
            inbound(&mut server, MAGIC, &nonce(2), &acceptor, 8).await
        });
        let client_nonce = outbound(&mut client, MAGIC, &nonce(1), &dialer)
            .await
            .unwrap();
        let server_nonce = server_task.await.unwrap().unwrap();

        assert_eq!(client_nonce, nonce(2));
        assert_eq!(server_nonce, nonce(1));
    }

    #[tokio::test]
    async fn test_magic_mismatch_rejected() {
        let (mut client, mut server) = pair().await;
        let dialer = Registry::new();
        let acceptor = Registry::new();

        let server_task = tokio::spawn(async move {
            inbound(&mut server, &[0xCC, 0xDD], &nonce(2), &acceptor, 8).await
        });
        let client_result = outbound(&mut client, MAGIC, &nonce(1), &dialer).await;

        let server_result = server_task.await.unwrap();
        assert!(matches!(
            server_result,
            Err(NetworkError::HandshakeReject(RejectReason::MagicMismatch))
        ));
        // The acceptor never replied, so the dialer sees an error as well.
        assert!(client_result.is_err());
    }

    #[tokio::test]
    async fn test_self_connect_rejected() {
        let (mut client, mut server) = pair().await;
        let registry = Registry::new();
        let shared = nonce(1);

        let acceptor = Registry::new();
        let server_task = tokio::spawn(async move {
            inbound(&mut server, MAGIC, &shared, &acceptor, 8).await
        });
        let result = outbound(&mut client, MAGIC, &shared, &registry).await;

        // The acceptor rejects first: the advertised nonce is its own.
        assert!(matches!(
            server_task.await.unwrap(),
            Err(NetworkError::HandshakeReject(RejectReason::SelfConnect))
        ));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_nonce_rejected() {
        let (mut client, mut server) = pair().await;
        let dialer = Registry::new();
        let acceptor = Registry::new();
        registered(&acceptor, "k:1", 1);

        let server_task = tokio::spawn(async move {
            inbound(&mut server, MAGIC, &nonce(2), &acceptor, 8).await
        });
        let _ = outbound(&mut client, MAGIC, &nonce(1), &dialer).await;

        assert!(matches!(
            server_task.await.unwrap(),
            Err(NetworkError::HandshakeReject(RejectReason::DuplicateNonce))
        ));
    }

    #[tokio::test]
    async fn test_capacity_rejected() {
        let (mut client, mut server) = pair().await;
        let dialer = Registry::new();
        let acceptor = Registry::new();
        registered(&acceptor, "k:1", 3);
        registered(&acceptor, "k:2", 4);

        let server_task = tokio::spawn(async move {
            inbound(&mut server, MAGIC, &nonce(2), &acceptor, 2).await
        });
        let _ = outbound(&mut client, MAGIC, &nonce(1), &dialer).await;

        assert!(matches!(
            server_task.await.unwrap(),
            Err(NetworkError::HandshakeReject(RejectReason::CapacityReached))
        ));
    }
}
