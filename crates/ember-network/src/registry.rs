//! Registry of currently connected peers.

use crate::error::RejectReason;
use crate::peer::PeerHandle;
use crate::{NetworkError, NetworkResult, NONCE_LENGTH};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Address-keyed map of live peer handles.
///
/// All mutators take the internal lock; `slice` clones the handles out so
/// callers iterate outside it.
#[derive(Debug, Default)]
pub struct Registry {
    peers: RwLock<HashMap<String, PeerHandle>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, re-checking address and nonce uniqueness under
    /// the lock so promotion is atomic with insertion.
    pub(crate) fn add(&self, handle: PeerHandle) -> NetworkResult<()> {
        let mut peers = self.peers.write();
        if peers.contains_key(&handle.addr) {
            return Err(NetworkError::HandshakeReject(RejectReason::DuplicateAddress));
        }
        if peers.values().any(|peer| peer.nonce == handle.nonce) {
            return Err(NetworkError::HandshakeReject(RejectReason::DuplicateNonce));
        }
        peers.insert(handle.addr.clone(), handle);
        Ok(())
    }

    /// Remove and return the handle for an address.
    pub(crate) fn remove(&self, addr: &str) -> Option<PeerHandle> {
        self.peers.write().remove(addr)
    }

    /// Whether a peer with this address is registered.
    pub fn has(&self, addr: &str) -> bool {
        self.peers.read().contains_key(addr)
    }

    /// Handle for an address, if registered.
    pub(crate) fn get(&self, addr: &str) -> Option<PeerHandle> {
        self.peers.read().get(addr).cloned()
    }

    /// Number of registered peers.
    pub fn count(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether a peer already advertises this nonce.
    pub fn known_nonce(&self, nonce: &[u8; NONCE_LENGTH]) -> bool {
        self.peers.read().values().any(|peer| &peer.nonce == nonce)
    }

    /// Snapshot of all handles, safe to iterate outside the lock.
    pub(crate) fn slice(&self) -> Vec<PeerHandle> {
        self.peers.read().values().cloned().collect()
    }

    /// Snapshot of all registered addresses.
    pub fn addresses(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn handle(addr: &str, nonce: u8) -> PeerHandle {
        let (tx, _rx) = mpsc::channel(1);
        let mut bytes = [0u8; 16];
        bytes[0] = nonce;
        PeerHandle::new(addr.to_string(), bytes, tx, CancellationToken::new())
    }

    #[test]
    fn test_add_and_lookup() {
        let registry = Registry::new();
        registry.add(handle("a:1", 1)).unwrap();

        assert!(registry.has("a:1"));
        assert!(!registry.has("b:2"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("a:1").is_some());
        assert_eq!(registry.addresses(), vec!["a:1".to_string()]);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let registry = Registry::new();
        registry.add(handle("a:1", 1)).unwrap();
        let err = registry.add(handle("a:1", 2)).unwrap_err();
        assert!(matches!(
            err,
            NetworkError::HandshakeReject(RejectReason::DuplicateAddress)
        ));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let registry = Registry::new();
        registry.add(handle("a:1", 7)).unwrap();
        let err = registry.add(handle("b:2", 7)).unwrap_err();
        assert!(matches!(
            err,
            NetworkError::HandshakeReject(RejectReason::DuplicateNonce)
        ));
        assert!(!registry.has("b:2"));
    }

    #[test]
    fn test_known_nonce() {
        let registry = Registry::new();
        registry.add(handle("a:1", 9)).unwrap();

        let mut present = [0u8; 16];
        present[0] = 9;
        assert!(registry.known_nonce(&present));
        assert!(!registry.known_nonce(&[0u8; 16]));
    }

    #[test]
    fn test_remove() {
        let registry = Registry::new();
        registry.add(handle("a:1", 1)).unwrap();

        assert!(registry.remove("a:1").is_some());
        assert!(registry.remove("a:1").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_slice_is_snapshot() {
        let registry = Registry::new();
        registry.add(handle("a:1", 1)).unwrap();
        registry.add(handle("b:2", 2)).unwrap();

        let snapshot = registry.slice();
        registry.remove("a:1");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.count(), 1);
    }
}
