//! Peer connection abstraction.
//!
//! A connection multiplexes replication channels for many cores. The engine
//! decides which cores should be replicated over it; the transport does the
//! rest.

use offgrid_sync_types::{DiscoveryKey, PeerId};
use std::fmt;

/// Identifies one connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live, authenticated connection to a peer.
pub trait PeerConnection: Send + Sync {
    /// Stable identifier of this connection.
    fn id(&self) -> ConnectionId;

    /// The remote peer's public key.
    fn remote_public_key(&self) -> [u8; 32];

    /// The remote peer's id.
    fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.remote_public_key())
    }

    /// Start replicating a core over this connection. Must be idempotent.
    fn replicate(&self, discovery_key: &DiscoveryKey);

    /// Stop replicating a core over this connection. Must be idempotent.
    fn unreplicate(&self, discovery_key: &DiscoveryKey);
}
