//! Replication state of a single core across the local peer and remotes.
//!
//! A [`CoreReplicationState`] can exist before the core does: pre-have and
//! want messages from peers may arrive before we know the core's key. Once
//! the core is available it is attached with a [`CoreSnapshot`], and from
//! then on its signals arrive as [`CoreEvent`]s.
//!
//! Derivation is pull-based. Mutations only invalidate the cached
//! [`DerivedState`] and bump a version; [`CoreReplicationState::get_state`]
//! re-derives on the next read.

use crate::bitfield::Bitfield;
use crate::derive::{derive_state, DerivedState};
use crate::peer_state::PeerState;
use offgrid_sync_types::{BlockRange, DiscoveryKey, PeerId, SyncError};
use std::collections::BTreeMap;

/// A remote peer replicating a core, as seen when the core is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorePeer {
    /// The remote peer.
    pub peer_id: PeerId,
    /// The peer's current have bitfield for the core.
    pub remote_bitfield: Bitfield,
}

/// A point-in-time view of a live core, taken when it is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSnapshot {
    /// Discovery key of the core.
    pub discovery_key: DiscoveryKey,
    /// Known length of the core.
    pub length: u64,
    /// Blocks stored locally.
    pub local_bitfield: Bitfield,
    /// Peers already replicating the core.
    pub peers: Vec<CorePeer>,
}

/// Signals from a live core that change its replication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A peer started replicating the core.
    PeerAdd {
        /// The peer.
        peer_id: PeerId,
        /// The peer's have bitfield at connection time.
        remote_bitfield: Bitfield,
    },
    /// A peer stopped replicating the core.
    PeerRemove {
        /// The peer.
        peer_id: PeerId,
    },
    /// A connected peer sent its full have bitfield.
    PeerBitfield {
        /// The peer.
        peer_id: PeerId,
        /// The peer's have bitfield.
        bitfield: Bitfield,
    },
    /// A connected peer announced (or retracted) a range of blocks.
    PeerRange {
        /// The peer.
        peer_id: PeerId,
        /// Affected blocks.
        range: BlockRange,
        /// Whether the peer now has them.
        have: bool,
    },
    /// A block was downloaded and stored locally.
    Download {
        /// Index of the block.
        index: u64,
    },
    /// The core grew.
    Append {
        /// New known length.
        length: u64,
        /// Whether the new blocks were written locally (and are therefore had).
        written_locally: bool,
    },
    /// Local blocks were cleared.
    Clear {
        /// Cleared blocks.
        range: BlockRange,
    },
}

/// Replication state of one core.
#[derive(Debug, Clone)]
pub struct CoreReplicationState {
    discovery_key: DiscoveryKey,
    attached: bool,
    length: u64,
    local: PeerState,
    remotes: BTreeMap<PeerId, PeerState>,
    cached: Option<DerivedState>,
    version: u64,
}

impl CoreReplicationState {
    /// Start tracking a core that may not exist locally yet.
    pub fn new(discovery_key: DiscoveryKey) -> Self {
        Self {
            discovery_key,
            attached: false,
            length: 0,
            local: PeerState::new(),
            remotes: BTreeMap::new(),
            cached: None,
            version: 0,
        }
    }

    /// The core this state tracks.
    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    /// Whether a live core has been attached.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Known length of the core (0 until attached).
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Monotonic counter bumped on every change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of remote peers known for this core.
    pub fn peer_count(&self) -> usize {
        self.remotes.len()
    }

    /// Bind a live core.
    ///
    /// Returns `Ok(true)` when the core was attached, `Ok(false)` when a core
    /// was already attached (nothing changes), and an error when the
    /// snapshot belongs to a different core.
    pub fn attach_core(&mut self, snapshot: CoreSnapshot) -> Result<bool, SyncError> {
        if snapshot.discovery_key != self.discovery_key {
            return Err(SyncError::DiscoveryKeyMismatch {
                expected: self.discovery_key,
                actual: snapshot.discovery_key,
            });
        }
        if self.attached {
            return Ok(false);
        }

        self.attached = true;
        self.length = self.length.max(snapshot.length);
        self.local.set_haves_bitfield(snapshot.local_bitfield);
        for peer in snapshot.peers {
            self.peer_connected(peer.peer_id, peer.remote_bitfield);
        }
        self.invalidate();
        Ok(true)
    }

    /// Install a pre-have bitfield for a peer that may not be connected yet.
    pub fn set_haves_bitfield(&mut self, peer_id: PeerId, bitfield: Bitfield) {
        self.peer_mut(peer_id).set_pre_haves_bitfield(bitfield);
        self.invalidate();
    }

    /// Restrict a peer to wanting only the given ranges (plus any declared
    /// before).
    pub fn set_peer_wants(&mut self, peer_id: PeerId, ranges: &[BlockRange]) {
        let peer = self.peer_mut(peer_id);
        for range in ranges {
            peer.set_want_range(*range);
        }
        self.invalidate();
    }

    /// Make sure a peer has an entry, disconnected if new. Returns whether
    /// the peer was added.
    pub fn add_peer(&mut self, peer_id: PeerId) -> bool {
        if self.remotes.contains_key(&peer_id) {
            return false;
        }
        self.remotes.insert(peer_id, PeerState::new());
        self.invalidate();
        true
    }

    /// Whether a peer is currently replicating this core.
    pub fn is_peer_connected(&self, peer_id: &PeerId) -> bool {
        self.remotes
            .get(peer_id)
            .is_some_and(PeerState::is_connected)
    }

    /// Apply a signal from the live core. Returns whether anything changed.
    pub fn on_event(&mut self, event: CoreEvent) -> bool {
        match event {
            CoreEvent::PeerAdd {
                peer_id,
                remote_bitfield,
            } => {
                self.peer_connected(peer_id, remote_bitfield);
            }
            CoreEvent::PeerRemove { peer_id } => match self.remotes.get_mut(&peer_id) {
                Some(peer) => {
                    if !peer.set_connected(false) {
                        return false;
                    }
                }
                None => return false,
            },
            CoreEvent::PeerBitfield { peer_id, bitfield } => {
                self.peer_mut(peer_id).set_haves_bitfield(bitfield);
            }
            CoreEvent::PeerRange {
                peer_id,
                range,
                have,
            } => {
                self.peer_mut(peer_id).set_have_range(range, have);
            }
            CoreEvent::Download { index } => {
                if !self.local.set_have(index, true) {
                    return false;
                }
            }
            CoreEvent::Append {
                length,
                written_locally,
            } => {
                if length <= self.length {
                    return false;
                }
                if written_locally {
                    let added = BlockRange::new(self.length, length - self.length);
                    self.local.set_have_range(added, true);
                }
                self.length = length;
            }
            CoreEvent::Clear { range } => {
                self.local.set_have_range(range, false);
            }
        }
        self.invalidate();
        true
    }

    /// The derived state, re-derived only if something changed since the
    /// last call.
    pub fn get_state(&mut self) -> &DerivedState {
        let (length, local, remotes) = (self.length, &self.local, &self.remotes);
        self.cached
            .get_or_insert_with(|| derive_state(length, local, remotes))
    }

    fn peer_connected(&mut self, peer_id: PeerId, remote_bitfield: Bitfield) {
        let peer = self.peer_mut(peer_id);
        peer.set_connected(true);
        peer.set_haves_bitfield(remote_bitfield);
    }

    fn peer_mut(&mut self, peer_id: PeerId) -> &mut PeerState {
        self.remotes.entry(peer_id).or_default()
    }

    fn invalidate(&mut self) {
        self.cached = None;
        self.version += 1;
    }
}
