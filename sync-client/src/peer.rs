//! Per-connection sync controller.
//!
//! One [`PeerSyncController`] exists per connected peer. It holds the peer's
//! sync capabilities, decides which namespaces are enabled for it, and keeps
//! the connection replicating exactly the cores of those namespaces.

use crate::connection::{ConnectionId, PeerConnection};
use crate::core::CoreDirectory;
use offgrid_sync_core::{is_allowed, CapabilityMap, ExpiringSet};
use offgrid_sync_types::{DiscoveryKey, Namespace, NamespaceConfig, PeerId, SyncEnabledState};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Controls replication over one peer connection.
pub struct PeerSyncController {
    peer_id: PeerId,
    connection: Arc<dyn PeerConnection>,
    capabilities: CapabilityMap,
    enabled_state: SyncEnabledState,
    replicating: BTreeSet<DiscoveryKey>,
    unknown_keys: ExpiringSet<DiscoveryKey>,
}

impl PeerSyncController {
    /// Create a controller with no capabilities (everything blocked) and
    /// sync disabled.
    pub fn new(connection: Arc<dyn PeerConnection>, discovery_key_grace: Duration) -> Self {
        Self {
            peer_id: connection.peer_id(),
            connection,
            capabilities: CapabilityMap::new(),
            enabled_state: SyncEnabledState::None,
            replicating: BTreeSet::new(),
            unknown_keys: ExpiringSet::new(discovery_key_grace),
        }
    }

    /// The remote peer.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The underlying connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Per-namespace capability, as last resolved.
    pub fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    /// Enabled state last applied.
    pub fn sync_enabled_state(&self) -> SyncEnabledState {
        self.enabled_state
    }

    /// Whether a core is being replicated with this peer.
    pub fn is_replicating(&self, discovery_key: &DiscoveryKey) -> bool {
        self.replicating.contains(discovery_key)
    }

    /// Number of announced discovery keys waiting for their core.
    pub fn pending_discovery_keys(&self) -> usize {
        self.unknown_keys.len()
    }

    /// Whether a namespace is synced with this peer: it must be allowed by
    /// the peer's role and enabled by the current state.
    pub fn is_namespace_enabled(&self, namespace: Namespace, config: &NamespaceConfig) -> bool {
        if !is_allowed(&self.capabilities, namespace) {
            return false;
        }
        match self.enabled_state {
            SyncEnabledState::None => false,
            SyncEnabledState::Presync => config.is_presync(namespace),
            SyncEnabledState::All => true,
        }
    }

    /// Replace the capability map and reconcile replication.
    pub fn set_capabilities(
        &mut self,
        capabilities: CapabilityMap,
        directory: &CoreDirectory,
        config: &NamespaceConfig,
    ) {
        if capabilities != self.capabilities {
            tracing::debug!(
                "Capabilities changed for peer {:?}: {:?}",
                self.peer_id,
                capabilities
            );
            self.capabilities = capabilities;
            self.reconcile(directory, config);
        }
    }

    /// Apply a new enabled state and reconcile replication.
    pub fn set_sync_enabled_state(
        &mut self,
        state: SyncEnabledState,
        directory: &CoreDirectory,
        config: &NamespaceConfig,
    ) {
        self.enabled_state = state;
        self.reconcile(directory, config);
    }

    /// The peer announced a core.
    ///
    /// Known cores are replicated if their namespace is enabled. Unknown
    /// keys are held for the grace period in case the core is added soon.
    pub fn handle_discovery_key(
        &mut self,
        discovery_key: DiscoveryKey,
        directory: &CoreDirectory,
        config: &NamespaceConfig,
        now: Instant,
    ) {
        if directory.contains(&discovery_key) {
            self.reconcile(directory, config);
            return;
        }
        if self.unknown_keys.insert(discovery_key, now) {
            tracing::debug!(
                "Holding discovery key {:?} from peer {:?} until its core is added",
                discovery_key,
                self.peer_id
            );
        }
    }

    /// A core was added locally. Claims a matching announced key and
    /// reconciles replication.
    pub fn on_core_added(
        &mut self,
        discovery_key: &DiscoveryKey,
        directory: &CoreDirectory,
        config: &NamespaceConfig,
    ) {
        if self.unknown_keys.remove(discovery_key) {
            tracing::debug!(
                "Core {:?} announced by peer {:?} is now available",
                discovery_key,
                self.peer_id
            );
        }
        self.reconcile(directory, config);
    }

    /// Drop announced keys whose grace period has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryKey> {
        let expired = self.unknown_keys.expire(now);
        for discovery_key in &expired {
            tracing::debug!(
                "Dropping discovery key {:?} from peer {:?}: core never added",
                discovery_key,
                self.peer_id
            );
        }
        expired
    }

    /// When the next announced key expires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.unknown_keys.next_deadline()
    }

    fn reconcile(&mut self, directory: &CoreDirectory, config: &NamespaceConfig) {
        for (discovery_key, namespace) in directory.iter() {
            let enabled = self.is_namespace_enabled(namespace, config);
            let replicating = self.replicating.contains(discovery_key);
            if enabled && !replicating {
                self.connection.replicate(discovery_key);
                self.replicating.insert(*discovery_key);
            } else if !enabled && replicating {
                self.connection.unreplicate(discovery_key);
                self.replicating.remove(discovery_key);
            }
        }
    }
}

impl std::fmt::Debug for PeerSyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSyncController")
            .field("peer_id", &self.peer_id)
            .field("connection", &self.connection.id())
            .field("enabled_state", &self.enabled_state)
            .field("replicating", &self.replicating.len())
            .finish()
    }
}
