//! Replication state summed over every core of one namespace.

use crate::core_state::CoreReplicationState;
use crate::derive::PeerSimpleState;
use offgrid_sync_types::{DiscoveryKey, Namespace, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How far a remote peer is into replicating a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerNamespaceStatus {
    /// The peer replicates none of the namespace's cores.
    Disconnected,
    /// The peer replicates some, but not all, of the namespace's cores.
    Connecting,
    /// The peer replicates every core of the namespace.
    Connected,
}

/// Summed counts and status for one remote peer in one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePeerState {
    /// Block counts summed over the namespace's cores.
    #[serde(flatten)]
    pub state: PeerSimpleState,
    /// Replication status.
    pub status: PeerNamespaceStatus,
}

/// Aggregated replication state of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceState {
    /// Number of cores tracked in the namespace.
    pub core_count: usize,
    /// Whether the local peer has anything to download or upload.
    pub data_to_sync: bool,
    /// Local counts summed over all cores.
    pub local_state: PeerSimpleState,
    /// Remote counts summed over all cores, with status.
    pub remote_states: BTreeMap<PeerId, NamespacePeerState>,
}

/// Owns the [`CoreReplicationState`] of every core in a namespace.
#[derive(Debug, Clone)]
pub struct NamespaceSyncState {
    namespace: Namespace,
    cores: BTreeMap<DiscoveryKey, CoreReplicationState>,
    cached: Option<(CacheKey, NamespaceState)>,
}

/// Core count plus the sum of core versions. Versions only grow, so any
/// change to any core, or a new core, changes the key.
type CacheKey = (usize, u64);

impl NamespaceSyncState {
    /// Create an empty namespace.
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            cores: BTreeMap::new(),
            cached: None,
        }
    }

    /// The namespace this state aggregates.
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Number of cores tracked.
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// Whether a core is tracked here.
    pub fn contains_core(&self, discovery_key: &DiscoveryKey) -> bool {
        self.cores.contains_key(discovery_key)
    }

    /// The tracked cores' discovery keys.
    pub fn discovery_keys(&self) -> impl Iterator<Item = &DiscoveryKey> {
        self.cores.keys()
    }

    /// Replication state of a core.
    pub fn core(&self, discovery_key: &DiscoveryKey) -> Option<&CoreReplicationState> {
        self.cores.get(discovery_key)
    }

    /// Mutable replication state of a core.
    pub fn core_mut(&mut self, discovery_key: &DiscoveryKey) -> Option<&mut CoreReplicationState> {
        self.cores.get_mut(discovery_key)
    }

    /// Replication state of a core, created empty if not yet tracked.
    pub fn core_or_insert(&mut self, discovery_key: DiscoveryKey) -> &mut CoreReplicationState {
        self.cores
            .entry(discovery_key)
            .or_insert_with(|| CoreReplicationState::new(discovery_key))
    }

    /// Register a peer, disconnected, in every core.
    pub fn add_peer(&mut self, peer_id: PeerId) {
        for core in self.cores.values_mut() {
            core.add_peer(peer_id);
        }
    }

    /// The aggregated state, recomputed only if any core changed.
    pub fn get_state(&mut self) -> &NamespaceState {
        let key = self.cache_key();
        let state = match self.cached.take() {
            Some((cached_key, state)) if cached_key == key => state,
            _ => self.aggregate(),
        };
        &self.cached.insert((key, state)).1
    }

    fn cache_key(&self) -> CacheKey {
        let versions = self.cores.values().map(CoreReplicationState::version).sum();
        (self.cores.len(), versions)
    }

    fn aggregate(&mut self) -> NamespaceState {
        let core_count = self.cores.len();
        let mut local_state = PeerSimpleState::default();
        let mut remotes: BTreeMap<PeerId, (PeerSimpleState, usize)> = BTreeMap::new();

        for core in self.cores.values_mut() {
            let derived = core.get_state();
            local_state.add(&derived.local_state);
            for (peer_id, remote) in &derived.remote_states {
                let (sum, connected) = remotes.entry(*peer_id).or_default();
                sum.add(&remote.state);
                if remote.connected {
                    *connected += 1;
                }
            }
        }

        let remote_states = remotes
            .into_iter()
            .map(|(peer_id, (state, connected))| {
                let status = if connected == 0 {
                    PeerNamespaceStatus::Disconnected
                } else if connected == core_count {
                    PeerNamespaceStatus::Connected
                } else {
                    PeerNamespaceStatus::Connecting
                };
                (peer_id, NamespacePeerState { state, status })
            })
            .collect();

        NamespaceState {
            core_count,
            data_to_sync: local_state.want > 0 || local_state.wanted > 0,
            local_state,
            remote_states,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::Bitfield;
    use crate::core_state::{CoreEvent, CoreSnapshot};

    fn key(n: u8) -> DiscoveryKey {
        DiscoveryKey::from_array([n; 32])
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_public_key(&[n; 32])
    }

    fn attach(ns: &mut NamespaceSyncState, n: u8, length: u64, local: &[u32]) {
        ns.core_or_insert(key(n))
            .attach_core(CoreSnapshot {
                discovery_key: key(n),
                length,
                local_bitfield: Bitfield::from_words(0, local),
                peers: vec![],
            })
            .unwrap();
    }

    fn connect(ns: &mut NamespaceSyncState, n: u8, peer_id: PeerId, have: &[u32]) {
        ns.core_mut(&key(n)).unwrap().on_event(CoreEvent::PeerAdd {
            peer_id,
            remote_bitfield: Bitfield::from_words(0, have),
        });
    }

    #[test]
    fn empty_namespace() {
        let mut ns = NamespaceSyncState::new(Namespace::Auth);
        let state = ns.get_state();
        assert_eq!(state.core_count, 0);
        assert!(!state.data_to_sync);
        assert!(state.remote_states.is_empty());
    }

    #[test]
    fn sums_across_cores() {
        let mut ns = NamespaceSyncState::new(Namespace::Data);
        attach(&mut ns, 1, 4, &[0b1111]);
        attach(&mut ns, 2, 2, &[0b11]);
        connect(&mut ns, 1, peer(9), &[0b0011]);
        connect(&mut ns, 2, peer(9), &[0b00]);

        let state = ns.get_state();
        assert_eq!(state.core_count, 2);
        assert_eq!(state.local_state.have, 6);
        assert_eq!(state.local_state.wanted, 4);
        assert!(state.data_to_sync);

        let remote = state.remote_states[&peer(9)];
        assert_eq!(remote.state.have, 2);
        assert_eq!(remote.state.want, 4);
        assert_eq!(remote.status, PeerNamespaceStatus::Connected);
    }

    #[test]
    fn fully_synced_namespace_has_no_data_to_sync() {
        let mut ns = NamespaceSyncState::new(Namespace::Config);
        attach(&mut ns, 1, 3, &[0b111]);
        connect(&mut ns, 1, peer(9), &[0b111]);
        assert!(!ns.get_state().data_to_sync);
    }

    #[test]
    fn status_follows_connected_core_count() {
        let mut ns = NamespaceSyncState::new(Namespace::Auth);
        attach(&mut ns, 1, 1, &[1]);
        attach(&mut ns, 2, 1, &[1]);
        ns.add_peer(peer(9));
        assert_eq!(
            ns.get_state().remote_states[&peer(9)].status,
            PeerNamespaceStatus::Disconnected
        );

        connect(&mut ns, 1, peer(9), &[1]);
        assert_eq!(
            ns.get_state().remote_states[&peer(9)].status,
            PeerNamespaceStatus::Connecting
        );

        connect(&mut ns, 2, peer(9), &[1]);
        assert_eq!(
            ns.get_state().remote_states[&peer(9)].status,
            PeerNamespaceStatus::Connected
        );
    }

    #[test]
    fn new_core_invalidates_cache() {
        let mut ns = NamespaceSyncState::new(Namespace::Blob);
        attach(&mut ns, 1, 2, &[0b11]);
        assert_eq!(ns.get_state().local_state.have, 2);

        ns.core_or_insert(key(2));
        assert_eq!(ns.get_state().core_count, 2);
        assert!(ns.contains_core(&key(2)));
        assert_eq!(ns.discovery_keys().count(), 2);
    }

    #[test]
    fn repeated_reads_are_identical() {
        let mut ns = NamespaceSyncState::new(Namespace::Data);
        attach(&mut ns, 1, 4, &[0b0101]);
        connect(&mut ns, 1, peer(9), &[0b1010]);
        let first = ns.get_state().clone();
        assert_eq!(&first, ns.get_state());
    }

    #[test]
    fn json_uses_camel_case_and_status() {
        let mut ns = NamespaceSyncState::new(Namespace::Auth);
        attach(&mut ns, 1, 1, &[1]);
        connect(&mut ns, 1, peer(9), &[1]);
        let json = serde_json::to_value(ns.get_state()).unwrap();
        assert_eq!(json["coreCount"], 1);
        assert_eq!(json["dataToSync"], false);
        assert_eq!(json["remoteStates"][peer(9).to_string()]["status"], "connected");
    }
}
