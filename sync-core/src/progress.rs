//! Whether sync is complete, and the per-device progress breakdown.

use crate::namespace_state::{NamespaceState, PeerNamespaceStatus};
use offgrid_sync_types::{
    DeviceNamespaceGroupSyncState, DeviceSyncState, Namespace, NamespaceConfig, PeerId,
    SyncCapability,
};
use std::collections::BTreeMap;

/// Aggregated state of every tracked namespace.
pub type NamespaceStates = BTreeMap<Namespace, NamespaceState>;

/// Per-namespace sync capability of one peer.
pub type CapabilityMap = BTreeMap<Namespace, SyncCapability>;

/// Whether a peer may sync a namespace. Unknown capabilities count as
/// blocked.
pub fn is_allowed(capabilities: &CapabilityMap, namespace: Namespace) -> bool {
    capabilities.get(&namespace) == Some(&SyncCapability::Allowed)
}

/// Whether there is nothing left to sync in `namespaces`.
///
/// Holds when, for every namespace, the local peer has nothing to download
/// or upload, and every peer allowed to sync the namespace has a record in
/// it that is not still connecting. Namespaces without cores have no
/// records and only the local condition applies.
pub fn is_synced<'a>(
    states: &NamespaceStates,
    namespaces: &[Namespace],
    peers: impl IntoIterator<Item = (&'a PeerId, &'a CapabilityMap)>,
) -> bool {
    let tracked = || {
        namespaces
            .iter()
            .filter_map(|ns| states.get(ns).map(|state| (*ns, state)))
    };

    if tracked().any(|(_, state)| state.data_to_sync) {
        return false;
    }

    for (peer_id, capabilities) in peers {
        for (namespace, state) in tracked() {
            if !is_allowed(capabilities, namespace) || state.core_count == 0 {
                continue;
            }
            match state.remote_states.get(peer_id) {
                None => return false,
                Some(remote) if remote.status == PeerNamespaceStatus::Connecting => {
                    return false
                }
                Some(_) => {}
            }
        }
    }
    true
}

/// Sum each peer's want/wanted counts into presync ("initial") and data
/// groups, skipping namespaces the peer may not sync.
pub fn reduce_sync_state<'a>(
    states: &NamespaceStates,
    config: &NamespaceConfig,
    peers: impl IntoIterator<Item = (&'a PeerId, &'a CapabilityMap)>,
) -> BTreeMap<PeerId, DeviceSyncState> {
    let mut result = BTreeMap::new();

    for (peer_id, capabilities) in peers {
        let mut device = DeviceSyncState::default();
        for &namespace in config.all() {
            if !is_allowed(capabilities, namespace) {
                continue;
            }
            let Some(remote) = states
                .get(&namespace)
                .and_then(|state| state.remote_states.get(peer_id))
            else {
                continue;
            };

            let group: &mut DeviceNamespaceGroupSyncState = if config.is_presync(namespace) {
                &mut device.initial
            } else {
                &mut device.data
            };
            group.is_enabled = true;
            group.want += remote.state.want;
            group.wanted += remote.state.wanted;
        }
        result.insert(*peer_id, device);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::PeerSimpleState;
    use crate::namespace_state::NamespacePeerState;

    fn peer(n: u8) -> PeerId {
        PeerId::from_public_key(&[n; 32])
    }

    fn allowed_everywhere() -> CapabilityMap {
        Namespace::ALL
            .into_iter()
            .map(|ns| (ns, SyncCapability::Allowed))
            .collect()
    }

    fn remote(status: PeerNamespaceStatus, want: u64, wanted: u64) -> NamespacePeerState {
        NamespacePeerState {
            state: PeerSimpleState {
                want,
                wanted,
                ..PeerSimpleState::default()
            },
            status,
        }
    }

    fn namespace_state(peers: &[(PeerId, NamespacePeerState)]) -> NamespaceState {
        NamespaceState {
            core_count: 1,
            data_to_sync: false,
            local_state: PeerSimpleState::default(),
            remote_states: peers.iter().copied().collect(),
        }
    }

    fn all_namespaces(state: NamespaceState) -> NamespaceStates {
        Namespace::ALL
            .into_iter()
            .map(|ns| (ns, state.clone()))
            .collect()
    }

    #[test]
    fn synced_with_no_peers() {
        let states = all_namespaces(namespace_state(&[]));
        let peers: BTreeMap<PeerId, CapabilityMap> = BTreeMap::new();
        assert!(is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn local_data_to_sync_blocks_sync() {
        let mut states = all_namespaces(namespace_state(&[]));
        if let Some(data) = states.get_mut(&Namespace::Data) {
            data.data_to_sync = true;
        }
        let peers: BTreeMap<PeerId, CapabilityMap> = BTreeMap::new();
        assert!(!is_synced(&states, &Namespace::ALL, &peers));
        assert!(is_synced(
            &states,
            &[Namespace::Auth, Namespace::Config, Namespace::BlobIndex],
            &peers
        ));
    }

    #[test]
    fn absent_peer_is_not_synced() {
        let states = all_namespaces(namespace_state(&[]));
        let peers = BTreeMap::from([(peer(1), allowed_everywhere())]);
        assert!(!is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn connecting_peer_is_not_synced() {
        let states = all_namespaces(namespace_state(&[(
            peer(1),
            remote(PeerNamespaceStatus::Connecting, 0, 0),
        )]));
        let peers = BTreeMap::from([(peer(1), allowed_everywhere())]);
        assert!(!is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn connected_and_disconnected_peers_are_synced() {
        let states = all_namespaces(namespace_state(&[
            (peer(1), remote(PeerNamespaceStatus::Connected, 0, 0)),
            (peer(2), remote(PeerNamespaceStatus::Disconnected, 0, 0)),
        ]));
        let peers = BTreeMap::from([
            (peer(1), allowed_everywhere()),
            (peer(2), allowed_everywhere()),
        ]);
        assert!(is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn blocked_namespaces_are_ignored() {
        let mut states = all_namespaces(namespace_state(&[(
            peer(1),
            remote(PeerNamespaceStatus::Connected, 0, 0),
        )]));
        if let Some(blob) = states.get_mut(&Namespace::Blob) {
            blob.remote_states.clear();
        }
        let mut capabilities = allowed_everywhere();
        let peers = BTreeMap::from([(peer(1), capabilities.clone())]);
        assert!(!is_synced(&states, &Namespace::ALL, &peers));

        capabilities.insert(Namespace::Blob, SyncCapability::Blocked);
        let peers = BTreeMap::from([(peer(1), capabilities)]);
        assert!(is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn unknown_capability_counts_as_blocked() {
        let states = all_namespaces(namespace_state(&[]));
        let peers = BTreeMap::from([(peer(1), CapabilityMap::new())]);
        assert!(is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn namespaces_without_cores_skip_peer_check() {
        let mut state = namespace_state(&[]);
        state.core_count = 0;
        let states = all_namespaces(state);
        let peers = BTreeMap::from([(peer(1), allowed_everywhere())]);
        assert!(is_synced(&states, &Namespace::ALL, &peers));
    }

    #[test]
    fn reduce_groups_presync_and_data() {
        let config = NamespaceConfig::default();
        let mut states = NamespaceStates::new();
        for ns in Namespace::ALL {
            let (want, wanted) = if config.is_presync(ns) { (1, 2) } else { (10, 20) };
            states.insert(
                ns,
                namespace_state(&[(peer(1), remote(PeerNamespaceStatus::Connected, want, wanted))]),
            );
        }
        let peers = BTreeMap::from([(peer(1), allowed_everywhere())]);

        let devices = reduce_sync_state(&states, &config, &peers);

        let device = devices[&peer(1)];
        assert!(device.initial.is_enabled);
        assert_eq!(device.initial.want, 3);
        assert_eq!(device.initial.wanted, 6);
        assert!(device.data.is_enabled);
        assert_eq!(device.data.want, 20);
        assert_eq!(device.data.wanted, 40);
    }

    #[test]
    fn reduce_skips_blocked_and_absent() {
        let config = NamespaceConfig::default();
        let mut states = all_namespaces(namespace_state(&[(
            peer(1),
            remote(PeerNamespaceStatus::Connected, 5, 5),
        )]));
        if let Some(blob) = states.get_mut(&Namespace::Blob) {
            blob.remote_states.clear();
        }
        let mut capabilities = allowed_everywhere();
        capabilities.insert(Namespace::Data, SyncCapability::Blocked);
        let peers = BTreeMap::from([(peer(1), capabilities), (peer(2), CapabilityMap::new())]);

        let devices = reduce_sync_state(&states, &config, &peers);

        let device = devices[&peer(1)];
        assert!(device.initial.is_enabled);
        assert!(!device.data.is_enabled);
        assert_eq!(device.data.want, 0);
        assert_eq!(devices[&peer(2)], DeviceSyncState::default());
    }
}
