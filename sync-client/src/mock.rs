//! Mock collaborators for testing.
//!
//! [`MockCore`] keeps an in-memory bitfield and pushes [`CoreEvent`]s to its
//! subscribers; [`MockConnection`] records which cores it was asked to
//! replicate.

use crate::connection::{ConnectionId, PeerConnection};
use crate::core::Core;
use offgrid_sync_core::{Bitfield, CoreEvent, CorePeer, CoreSnapshot};
use offgrid_sync_types::{BlockRange, DiscoveryKey, PeerId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Mock core for testing.
///
/// Helper methods update the mock's own state (so later snapshots agree)
/// and notify subscribers.
#[derive(Debug, Clone)]
pub struct MockCore {
    discovery_key: DiscoveryKey,
    inner: Arc<Mutex<MockCoreInner>>,
}

#[derive(Debug, Default)]
struct MockCoreInner {
    length: u64,
    local: Bitfield,
    peers: BTreeMap<PeerId, Bitfield>,
    subscribers: Vec<mpsc::UnboundedSender<CoreEvent>>,
}

impl MockCore {
    /// Create a core of `length` blocks, none of them stored locally.
    pub fn new(core_key: [u8; 32], length: u64) -> Self {
        Self {
            discovery_key: DiscoveryKey::from_core_key(&core_key),
            inner: Arc::new(Mutex::new(MockCoreInner {
                length,
                ..MockCoreInner::default()
            })),
        }
    }

    /// Create a core of `length` blocks, all stored locally.
    pub fn complete(core_key: [u8; 32], length: u64) -> Self {
        let core = Self::new(core_key, length);
        core.lock().local.set_range(0, length, true);
        core
    }

    /// Mark local blocks without notifying subscribers (setup before attach).
    pub fn set_local_range(&self, start: u64, length: u64) {
        self.lock().local.set_range(start, length, true);
    }

    /// A peer connects with the given have bitfield.
    pub fn connect_peer(&self, peer_id: PeerId, remote_bitfield: Bitfield) {
        self.lock().peers.insert(peer_id, remote_bitfield.clone());
        self.emit(CoreEvent::PeerAdd {
            peer_id,
            remote_bitfield,
        });
    }

    /// A peer disconnects.
    pub fn disconnect_peer(&self, peer_id: PeerId) {
        self.lock().peers.remove(&peer_id);
        self.emit(CoreEvent::PeerRemove { peer_id });
    }

    /// A connected peer announces a range of blocks.
    pub fn peer_has_range(&self, peer_id: PeerId, range: BlockRange) {
        if let Some(bitfield) = self.lock().peers.get_mut(&peer_id) {
            bitfield.set_range(range.start, range.length, true);
        }
        self.emit(CoreEvent::PeerRange {
            peer_id,
            range,
            have: true,
        });
    }

    /// A block is downloaded.
    pub fn download(&self, index: u64) {
        self.lock().local.set(index, true);
        self.emit(CoreEvent::Download { index });
    }

    /// Append `count` locally written blocks.
    pub fn append(&self, count: u64) {
        let length = {
            let mut inner = self.lock();
            let start = inner.length;
            inner.local.set_range(start, count, true);
            inner.length += count;
            inner.length
        };
        self.emit(CoreEvent::Append {
            length,
            written_locally: true,
        });
    }

    /// Send an arbitrary event to subscribers without touching mock state.
    pub fn emit(&self, event: CoreEvent) {
        self.lock()
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| !subscriber.is_closed());
        inner.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockCoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Core for MockCore {
    fn discovery_key(&self) -> DiscoveryKey {
        self.discovery_key
    }

    fn snapshot(&self) -> CoreSnapshot {
        let inner = self.lock();
        CoreSnapshot {
            discovery_key: self.discovery_key,
            length: inner.length,
            local_bitfield: inner.local.clone(),
            peers: inner
                .peers
                .iter()
                .map(|(peer_id, bitfield)| CorePeer {
                    peer_id: *peer_id,
                    remote_bitfield: bitfield.clone(),
                })
                .collect(),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

/// A replication call recorded by [`MockConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationCall {
    /// `replicate` was called.
    Replicate(DiscoveryKey),
    /// `unreplicate` was called.
    Unreplicate(DiscoveryKey),
}

/// Mock peer connection for testing.
#[derive(Debug, Clone)]
pub struct MockConnection {
    id: ConnectionId,
    remote_public_key: [u8; 32],
    inner: Arc<Mutex<MockConnectionInner>>,
}

#[derive(Debug, Default)]
struct MockConnectionInner {
    replicating: BTreeSet<DiscoveryKey>,
    calls: Vec<ReplicationCall>,
}

impl MockConnection {
    /// Create a connection to the peer with the given public key.
    pub fn new(id: u64, remote_public_key: [u8; 32]) -> Self {
        Self {
            id: ConnectionId(id),
            remote_public_key,
            inner: Arc::default(),
        }
    }

    /// Cores currently being replicated.
    pub fn replicating(&self) -> BTreeSet<DiscoveryKey> {
        self.lock().replicating.clone()
    }

    /// Whether a core is being replicated.
    pub fn is_replicating(&self, discovery_key: &DiscoveryKey) -> bool {
        self.lock().replicating.contains(discovery_key)
    }

    /// Every replicate/unreplicate call, in order.
    pub fn calls(&self) -> Vec<ReplicationCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerConnection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_public_key(&self) -> [u8; 32] {
        self.remote_public_key
    }

    fn replicate(&self, discovery_key: &DiscoveryKey) {
        let mut inner = self.lock();
        inner.replicating.insert(*discovery_key);
        inner.calls.push(ReplicationCall::Replicate(*discovery_key));
    }

    fn unreplicate(&self, discovery_key: &DiscoveryKey) {
        let mut inner = self.lock();
        inner.replicating.remove(discovery_key);
        inner.calls.push(ReplicationCall::Unreplicate(*discovery_key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_helpers() {
        let core = MockCore::new([1; 32], 2);
        core.set_local_range(0, 1);
        core.append(2);
        core.connect_peer(PeerId::from_public_key(&[9; 32]), Bitfield::from_words(0, &[1]));

        let snapshot = core.snapshot();
        assert_eq!(snapshot.length, 4);
        assert_eq!(snapshot.local_bitfield.count_ones(0, 4), 3);
        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.discovery_key, DiscoveryKey::from_core_key(&[1; 32]));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let core = MockCore::new([1; 32], 4);
        let mut events = core.subscribe();
        core.download(3);
        assert_eq!(events.recv().await, Some(CoreEvent::Download { index: 3 }));

        drop(events);
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    fn connection_records_calls() {
        let connection = MockConnection::new(7, [2; 32]);
        let key = DiscoveryKey::from_array([3; 32]);
        connection.replicate(&key);
        assert!(connection.is_replicating(&key));
        connection.unreplicate(&key);
        assert!(connection.replicating().is_empty());
        assert_eq!(
            connection.calls(),
            vec![
                ReplicationCall::Replicate(key),
                ReplicationCall::Unreplicate(key)
            ]
        );
        assert_eq!(connection.peer_id(), PeerId::from_public_key(&[2; 32]));
        assert_eq!(connection.id(), ConnectionId(7));
    }
}
