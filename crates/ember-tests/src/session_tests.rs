//! Peer session behavior: heartbeats, ordering, stalls, cleanup.

use crate::harness::{ManualPeer, TestNode, TEST_MAGIC};
use ember_network::{Event, Message, NetworkError};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_heartbeat_ping_pong() {
    let mut a = TestNode::start_tuned(&TEST_MAGIC, |config| {
        config.heartbeat = Duration::from_millis(100);
    })
    .await;

    let mut peer = ManualPeer::connect(&a.address, &TEST_MAGIC).await.unwrap();
    a.await_connected(WAIT).await;

    // Collect heartbeats for a few periods, answering each ping.
    let mut pings = 0u32;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(450);
    while let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) {
        match peer.recv(remaining).await {
            Some(Message::Ping { nonce }) => {
                pings += 1;
                peer.send(Message::Pong { nonce }).await;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(pings >= 2, "expected at least 2 pings, got {}", pings);

    // The node answers our pings with the matching nonce.
    peer.send(Message::Ping { nonce: 777 }).await;
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("no pong before deadline");
        match peer.recv(remaining).await {
            Some(Message::Pong { nonce }) => {
                assert_eq!(nonce, 777);
                break;
            }
            Some(_) => continue,
            None => panic!("connection closed while waiting for pong"),
        }
    }

    // Heartbeating kept the session alive throughout.
    assert_eq!(a.node.peers().len(), 1);

    a.node.shutdown().await;
}

#[tokio::test]
async fn test_send_preserves_order() {
    let mut a = TestNode::start(&TEST_MAGIC).await;
    let mut peer = ManualPeer::connect(&a.address, &TEST_MAGIC).await.unwrap();
    let addr = a.await_connected(WAIT).await;

    for i in 0..10 {
        a.node
            .send(&addr, Message::Text(format!("msg-{}", i)))
            .unwrap();
    }

    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    while received.len() < 10 {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("messages missing before deadline");
        match peer.recv(remaining).await {
            Some(Message::Text(text)) => received.push(text),
            Some(_) => continue,
            None => panic!("connection closed mid-stream"),
        }
    }
    let expected: Vec<String> = (0..10).map(|i| format!("msg-{}", i)).collect();
    assert_eq!(received, expected);

    a.node.shutdown().await;
}

#[tokio::test]
async fn test_stalling_peer_disconnected() {
    let mut a = TestNode::start_tuned(&TEST_MAGIC, |config| {
        config.timeout = Duration::from_millis(500);
        config.balance = Duration::from_secs(10);
    })
    .await;

    // A peer that completes the handshake and then never reads.
    let peer = ManualPeer::connect(&a.address, &TEST_MAGIC).await.unwrap();
    let addr = a.await_connected(WAIT).await;

    let mut stalled = false;
    for _ in 0..100 {
        let blob: Vec<u8> = (0..131_072).map(|_| rand::random::<u8>()).collect();
        match a.node.send(&addr, Message::Blob(blob)) {
            Ok(()) => tokio::time::sleep(Duration::from_millis(1)).await,
            Err(NetworkError::Stalled(stalling)) => {
                assert_eq!(stalling, addr);
                stalled = true;
                break;
            }
            Err(e) => panic!("unexpected send error: {}", e),
        }
    }
    assert!(stalled, "send never reported a stall");

    let gone = a.await_disconnected(WAIT).await;
    assert_eq!(gone, addr);
    assert!(a.node.peers().is_empty());

    let (_, failures) = a.book.stats(&addr).unwrap();
    assert!(failures >= 1);

    drop(peer);
    a.node.shutdown().await;
}

#[tokio::test]
async fn test_remote_close_cleans_up() {
    let mut a = TestNode::start(&TEST_MAGIC).await;
    let peer = ManualPeer::connect(&a.address, &TEST_MAGIC).await.unwrap();
    let addr = a.await_connected(WAIT).await;

    drop(peer);

    let gone = a.await_disconnected(WAIT).await;
    assert_eq!(gone, addr);
    assert!(a.node.peers().is_empty());

    // The disconnect is reported exactly once.
    while let Some(event) = a.next_event(Duration::from_millis(200)).await {
        assert!(!matches!(event, Event::Disconnected { .. }));
    }

    // One success from the handshake, one failure from the drop.
    let (successes, failures) = a.book.stats(&addr).unwrap();
    assert!(successes >= 1);
    assert!(failures >= 1);

    a.node.shutdown().await;
}
