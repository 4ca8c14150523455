//! Core abstraction: the append-only logs whose replication is coordinated.
//!
//! The engine never reads blocks. It only needs a core's identity, a
//! snapshot of its bitfields when attached, and a stream of the signals
//! that change them afterwards.

use offgrid_sync_core::{CoreEvent, CoreSnapshot};
use offgrid_sync_types::{DiscoveryKey, Namespace};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A live core.
pub trait Core: Send + Sync {
    /// Discovery key identifying the core.
    fn discovery_key(&self) -> DiscoveryKey;

    /// Current length, local bitfield and connected peers.
    fn snapshot(&self) -> CoreSnapshot;

    /// Receive every subsequent [`CoreEvent`].
    ///
    /// The engine subscribes before taking a snapshot, so an event may also
    /// be reflected in the snapshot; applying it again must be harmless.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent>;
}

/// The live cores attached to the engine, and their namespaces.
#[derive(Default, Clone)]
pub struct CoreDirectory {
    cores: BTreeMap<DiscoveryKey, (Namespace, Arc<dyn Core>)>,
}

impl CoreDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attached core. Returns `false` if it was already present.
    pub fn insert(&mut self, namespace: Namespace, core: Arc<dyn Core>) -> bool {
        let discovery_key = core.discovery_key();
        if self.cores.contains_key(&discovery_key) {
            return false;
        }
        self.cores.insert(discovery_key, (namespace, core));
        true
    }

    /// Namespace of an attached core.
    pub fn namespace_of(&self, discovery_key: &DiscoveryKey) -> Option<Namespace> {
        self.cores.get(discovery_key).map(|(namespace, _)| *namespace)
    }

    /// Whether a core is attached.
    pub fn contains(&self, discovery_key: &DiscoveryKey) -> bool {
        self.cores.contains_key(discovery_key)
    }

    /// Every attached core's discovery key and namespace.
    pub fn iter(&self) -> impl Iterator<Item = (&DiscoveryKey, Namespace)> {
        self.cores
            .iter()
            .map(|(discovery_key, (namespace, _))| (discovery_key, *namespace))
    }

    /// Number of attached cores.
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Whether no core is attached.
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }
}

impl std::fmt::Debug for CoreDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
