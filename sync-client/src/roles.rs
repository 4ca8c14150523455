//! Role lookups: which namespaces a peer may sync.

use async_trait::async_trait;
use offgrid_sync_types::{Namespace, PeerId, SyncCapability};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Resolves a peer's sync capability per namespace from its role.
///
/// Lookups may hit storage, so they are async. They are repeated on every
/// enablement evaluation, so role changes take effect without reconnecting.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    /// Capability of `peer_id` for `namespace`.
    async fn sync_capability(&self, peer_id: &PeerId, namespace: Namespace) -> SyncCapability;
}

/// In-memory roles: one default capability plus per-peer overrides.
#[derive(Debug)]
pub struct StaticRoles {
    default: SyncCapability,
    overrides: Mutex<BTreeMap<(PeerId, Namespace), SyncCapability>>,
}

impl StaticRoles {
    /// Every peer gets `default` for every namespace unless overridden.
    pub fn new(default: SyncCapability) -> Self {
        Self {
            default,
            overrides: Mutex::new(BTreeMap::new()),
        }
    }

    /// Every peer may sync everything.
    pub fn allow_all() -> Self {
        Self::new(SyncCapability::Allowed)
    }

    /// Override one peer's capability for one namespace.
    pub fn set(&self, peer_id: PeerId, namespace: Namespace, capability: SyncCapability) {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((peer_id, namespace), capability);
    }

    /// Block a peer from every namespace.
    pub fn block_peer(&self, peer_id: PeerId) {
        for namespace in Namespace::ALL {
            self.set(peer_id, namespace, SyncCapability::Blocked);
        }
    }

    fn lookup(&self, peer_id: &PeerId, namespace: Namespace) -> SyncCapability {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(*peer_id, namespace))
            .copied()
            .unwrap_or(self.default)
    }
}

#[async_trait]
impl RoleProvider for StaticRoles {
    async fn sync_capability(&self, peer_id: &PeerId, namespace: Namespace) -> SyncCapability {
        self.lookup(peer_id, namespace)
    }
}
