//! The sync engine task.
//!
//! All replication and enablement state is owned by a single task. Every
//! input (API calls, peer and core lifecycle, core signals, timers) arrives
//! through a channel or a deadline and is handled to completion before the
//! next, so no state is shared and no locking is needed.
//!
//! ```text
//! SyncApi / SyncDriver ──Command──▶ Engine ◀──CoreEvent── core forwarders
//!                                     │
//!                      sync-core (derivation, state machine, timers)
//!                                     │
//!             PeerSyncController ─▶ PeerConnection::replicate / unreplicate
//! ```

use crate::config::SyncConfig;
use crate::connection::{ConnectionId, PeerConnection};
use crate::core::{Core, CoreDirectory};
use crate::peer::PeerSyncController;
use crate::roles::RoleProvider;
use offgrid_sync_core::{
    is_allowed, is_synced, reduce_sync_state, Autostop, Bitfield, CapabilityMap, CoreEvent,
    CoreReplicationState, Enablement, ExpiringSet, NamespaceState, NamespaceStates,
    NamespaceSyncState, Throttle,
};
use offgrid_sync_types::{
    BlockRange, DiscoveryKey, Namespace, PeerId, PreHaveMessage, SyncError, SyncState, SyncType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

/// Requests handled by the engine task.
pub(crate) enum Command {
    /// Start data sync, optionally changing the autostop timeout
    /// (`Some(None)` disables autostop).
    Start {
        autostop: Option<Option<Duration>>,
    },
    Stop,
    SetAutostop(Option<Duration>),
    RequestFullStop,
    RescindFullStop,
    WaitForSync {
        sync_type: SyncType,
        reply: oneshot::Sender<()>,
    },
    AddPeer(Arc<dyn PeerConnection>),
    RemovePeer(ConnectionId),
    DiscoveryKey {
        connection_id: ConnectionId,
        discovery_key: DiscoveryKey,
    },
    AddCore {
        namespace: Namespace,
        core: Arc<dyn Core>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    PreHaves {
        peer_id: PeerId,
        message: PreHaveMessage,
    },
    PeerWants {
        namespace: Namespace,
        discovery_key: DiscoveryKey,
        peer_id: PeerId,
        ranges: Vec<BlockRange>,
    },
    NamespaceState {
        namespace: Namespace,
        reply: oneshot::Sender<Option<NamespaceState>>,
    },
    Shutdown,
}

/// Channels the engine publishes on.
pub(crate) struct Outputs {
    pub state: watch::Sender<SyncState>,
    pub events: broadcast::Sender<SyncState>,
    pub updates: watch::Sender<u64>,
}

pub(crate) struct Engine {
    config: SyncConfig,
    roles: Arc<dyn RoleProvider>,
    namespaces: BTreeMap<Namespace, NamespaceSyncState>,
    directory: CoreDirectory,
    controllers: BTreeMap<ConnectionId, PeerSyncController>,
    pending_keys: ExpiringSet<(ConnectionId, DiscoveryKey)>,
    enablement: Enablement,
    autostop: Autostop,
    throttle: Throttle,
    waiters: Vec<(SyncType, oneshot::Sender<()>)>,
    outputs: Outputs,
    core_events: mpsc::UnboundedSender<(DiscoveryKey, CoreEvent)>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Engine {
    pub(crate) fn new(
        config: SyncConfig,
        roles: Arc<dyn RoleProvider>,
        outputs: Outputs,
        core_events: mpsc::UnboundedSender<(DiscoveryKey, CoreEvent)>,
    ) -> Self {
        let namespaces = config
            .namespaces
            .all()
            .iter()
            .map(|ns| (*ns, NamespaceSyncState::new(*ns)))
            .collect();
        let mut autostop = Autostop::new();
        autostop.set_after(config.autostop_data_sync_after());

        Self {
            pending_keys: ExpiringSet::new(config.discovery_key_grace()),
            throttle: Throttle::new(config.throttle()),
            config,
            roles,
            namespaces,
            directory: CoreDirectory::new(),
            controllers: BTreeMap::new(),
            enablement: Enablement::new(),
            autostop,
            waiters: Vec::new(),
            outputs,
            core_events,
            forwarders: Vec::new(),
        }
    }

    /// Run until shut down or every handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut core_events: mpsc::UnboundedReceiver<(DiscoveryKey, CoreEvent)>,
    ) {
        tracing::debug!("Sync engine started");
        self.update_state().await;

        loop {
            let throttle_at = self.throttle.deadline();
            let autostop_at = self.autostop.deadline();
            let expiry_at = self.next_expiry();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some((discovery_key, event)) = core_events.recv() => {
                    self.handle_core_event(discovery_key, event);
                }
                _ = sleep_until(throttle_at) => {
                    if self.throttle.fire(now()) {
                        self.update_state().await;
                    }
                }
                _ = sleep_until(autostop_at) => {
                    if self.autostop.fire(now()) {
                        tracing::info!("No new data for {:?}, stopping data sync", self.autostop.after());
                        self.enablement.stop();
                        self.update_state().await;
                    }
                }
                _ = sleep_until(expiry_at) => self.expire_discovery_keys(now()),
            }
        }

        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        tracing::debug!("Sync engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { autostop } => {
                self.enablement.start();
                if let Some(after) = autostop {
                    self.autostop.set_after(after);
                }
                self.update_state().await;
            }
            Command::Stop => {
                self.enablement.stop();
                self.update_state().await;
            }
            Command::SetAutostop(after) => {
                self.autostop.set_after(after);
                self.update_state().await;
            }
            Command::RequestFullStop => {
                self.enablement.request_full_stop();
                self.update_state().await;
            }
            Command::RescindFullStop => {
                self.enablement.rescind_full_stop();
                self.update_state().await;
            }
            Command::WaitForSync { sync_type, reply } => {
                let states = self.namespace_states();
                if self.synced_for(&states, sync_type) {
                    let _ = reply.send(());
                } else {
                    self.waiters.push((sync_type, reply));
                }
            }
            Command::AddPeer(connection) => self.add_peer(connection).await,
            Command::RemovePeer(connection_id) => self.remove_peer(connection_id).await,
            Command::DiscoveryKey {
                connection_id,
                discovery_key,
            } => self.handle_discovery_key(connection_id, discovery_key),
            Command::AddCore {
                namespace,
                core,
                reply,
            } => {
                let _ = reply.send(self.add_core(namespace, core));
            }
            Command::PreHaves { peer_id, message } => self.handle_pre_haves(peer_id, message),
            Command::PeerWants {
                namespace,
                discovery_key,
                peer_id,
                ranges,
            } => self.set_peer_wants(namespace, discovery_key, peer_id, &ranges),
            Command::NamespaceState { namespace, reply } => {
                let state = self
                    .namespaces
                    .get_mut(&namespace)
                    .map(|ns| ns.get_state().clone());
                let _ = reply.send(state);
            }
            Command::Shutdown => {}
        }
    }

    /// Re-evaluate enablement and publish the result.
    async fn update_state(&mut self) {
        let now = now();
        self.refresh_capabilities().await;
        self.register_peers();
        let states = self.namespace_states();

        let data_have = states
            .get(&Namespace::Data)
            .map_or(0, |state| state.local_state.have);
        self.autostop.observe_data_have(data_have);

        let synced = self.synced_for(&states, self.enablement.target());
        let previous = self.enablement.current();
        let transition = self.enablement.evaluate(synced);
        self.autostop.apply(transition.autostop, now);

        if transition.state != previous {
            tracing::info!(
                "Setting sync enabled state to \"{}\" (was \"{}\")",
                transition.state,
                previous
            );
        } else {
            tracing::debug!(
                "Sync enabled state unchanged: \"{}\" (synced: {})",
                transition.state,
                synced
            );
        }

        for controller in self.controllers.values_mut() {
            controller.set_sync_enabled_state(
                transition.state,
                &self.directory,
                &self.config.namespaces,
            );
        }

        let devices = reduce_sync_state(&states, &self.config.namespaces, self.peer_capabilities());
        let snapshot = SyncState::new(transition.state, devices);
        self.outputs.state.send_replace(snapshot.clone());
        // No subscribers is fine.
        let _ = self.outputs.events.send(snapshot);
        self.outputs.updates.send_modify(|count| *count += 1);

        self.notify_waiters(&states);
    }

    fn notify_waiters(&mut self, states: &NamespaceStates) {
        let waiters = std::mem::take(&mut self.waiters);
        for (sync_type, reply) in waiters {
            if reply.is_closed() {
                continue;
            }
            if self.synced_for(states, sync_type) {
                let _ = reply.send(());
            } else {
                self.waiters.push((sync_type, reply));
            }
        }
    }

    fn synced_for(&self, states: &NamespaceStates, sync_type: SyncType) -> bool {
        is_synced(
            states,
            self.config.namespaces.for_sync_type(sync_type),
            self.peer_capabilities(),
        )
    }

    fn peer_capabilities(&self) -> impl Iterator<Item = (&PeerId, &CapabilityMap)> {
        self.controllers
            .values()
            .map(|controller| (controller.peer_id(), controller.capabilities()))
    }

    fn namespace_states(&mut self) -> NamespaceStates {
        self.namespaces
            .iter_mut()
            .map(|(namespace, state)| (*namespace, state.get_state().clone()))
            .collect()
    }

    async fn refresh_capabilities(&mut self) {
        for controller in self.controllers.values_mut() {
            let capabilities =
                resolve_capabilities(self.roles.as_ref(), controller.peer_id(), &self.config).await;
            controller.set_capabilities(capabilities, &self.directory, &self.config.namespaces);
        }
    }

    /// Give every peer a record in each core of the namespaces it may sync.
    /// Blocked namespaces get no record, so a blocked peer is owed nothing.
    fn register_peers(&mut self) {
        for controller in self.controllers.values() {
            for (namespace, state) in self.namespaces.iter_mut() {
                if is_allowed(controller.capabilities(), *namespace) {
                    state.add_peer(*controller.peer_id());
                }
            }
        }
    }

    async fn add_peer(&mut self, connection: Arc<dyn PeerConnection>) {
        let connection_id = connection.id();
        if self.controllers.contains_key(&connection_id) {
            tracing::warn!(
                "Unexpected existing peer sync controller for {} (peer {:?})",
                connection_id,
                connection.peer_id()
            );
            return;
        }

        let controller = PeerSyncController::new(connection, self.config.discovery_key_grace());
        let peer_id = *controller.peer_id();
        tracing::info!("Peer {:?} added on {}", peer_id, connection_id);

        self.controllers.insert(connection_id, controller);
        self.update_state().await;

        let now = now();
        let queued = self
            .pending_keys
            .take_matching(|(pending_id, _)| *pending_id == connection_id);
        if let Some(controller) = self.controllers.get_mut(&connection_id) {
            for (_, discovery_key) in queued {
                controller.handle_discovery_key(
                    discovery_key,
                    &self.directory,
                    &self.config.namespaces,
                    now,
                );
            }
        }
    }

    async fn remove_peer(&mut self, connection_id: ConnectionId) {
        self.pending_keys
            .take_matching(|(pending_id, _)| *pending_id == connection_id);
        let Some(controller) = self.controllers.remove(&connection_id) else {
            tracing::warn!(
                "Unexpected no existing peer sync controller for {}",
                connection_id
            );
            return;
        };
        tracing::info!(
            "Peer {:?} removed from {}",
            controller.peer_id(),
            connection_id
        );
        self.update_state().await;
    }

    fn handle_discovery_key(&mut self, connection_id: ConnectionId, discovery_key: DiscoveryKey) {
        if let Some(controller) = self.controllers.get_mut(&connection_id) {
            controller.handle_discovery_key(
                discovery_key,
                &self.directory,
                &self.config.namespaces,
                now(),
            );
            return;
        }
        // Either the peer is not in the project, or its peer-add has not
        // arrived yet.
        if self.pending_keys.insert((connection_id, discovery_key), now()) {
            tracing::debug!(
                "Queued discovery key {:?} for {} until the peer is added",
                discovery_key,
                connection_id
            );
        }
    }

    fn add_core(&mut self, namespace: Namespace, core: Arc<dyn Core>) -> Result<(), SyncError> {
        let discovery_key = core.discovery_key();
        let Some(namespace_state) = self.namespaces.get_mut(&namespace) else {
            return Err(SyncError::UntrackedNamespace(namespace));
        };
        if self.directory.contains(&discovery_key) {
            tracing::debug!("Core {:?} already attached", discovery_key);
            return Ok(());
        }

        let mut events = core.subscribe();
        let core_state = namespace_state.core_or_insert(discovery_key);
        if !core_state.attach_core(core.snapshot())? {
            tracing::debug!("Core {:?} already attached", discovery_key);
            return Ok(());
        }
        for controller in self.controllers.values() {
            if is_allowed(controller.capabilities(), namespace) {
                core_state.add_peer(*controller.peer_id());
            }
        }

        let forward = self.core_events.clone();
        self.forwarders.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forward.send((discovery_key, event)).is_err() {
                    break;
                }
            }
        }));

        self.directory.insert(namespace, core);
        tracing::debug!("Attached core {:?} in namespace {}", discovery_key, namespace);
        for controller in self.controllers.values_mut() {
            controller.on_core_added(&discovery_key, &self.directory, &self.config.namespaces);
        }
        self.throttle.notify(now());
        Ok(())
    }

    fn handle_core_event(&mut self, discovery_key: DiscoveryKey, event: CoreEvent) {
        let Some(namespace) = self.directory.namespace_of(&discovery_key) else {
            return;
        };
        let changed = self
            .namespaces
            .get_mut(&namespace)
            .and_then(|ns| ns.core_mut(&discovery_key))
            .is_some_and(|core| core.on_event(event));
        if changed {
            self.throttle.notify(now());
        }
    }

    fn handle_pre_haves(&mut self, peer_id: PeerId, message: PreHaveMessage) {
        let bitfield = Bitfield::from_words(message.start, &message.words);
        let Some(core) = self.message_core(message.namespace, message.discovery_key) else {
            return;
        };
        core.set_haves_bitfield(peer_id, bitfield);
        self.throttle.notify(now());
    }

    fn set_peer_wants(
        &mut self,
        namespace: Namespace,
        discovery_key: DiscoveryKey,
        peer_id: PeerId,
        ranges: &[BlockRange],
    ) {
        let Some(core) = self.message_core(namespace, discovery_key) else {
            return;
        };
        core.set_peer_wants(peer_id, ranges);
        self.throttle.notify(now());
    }

    /// Replication state of the core a peer message refers to.
    ///
    /// A core already tracked stays in the namespace it was tracked under.
    /// Only an unknown key is created, in the namespace the message names.
    fn message_core(
        &mut self,
        namespace: Namespace,
        discovery_key: DiscoveryKey,
    ) -> Option<&mut CoreReplicationState> {
        let tracked_in = self.directory.namespace_of(&discovery_key).or_else(|| {
            self.namespaces
                .iter()
                .find(|(_, state)| state.contains_core(&discovery_key))
                .map(|(ns, _)| *ns)
        });
        if let Some(tracked) = tracked_in.filter(|tracked| *tracked != namespace) {
            tracing::debug!(
                "Core {:?} is tracked in {}, not {}",
                discovery_key,
                tracked,
                namespace
            );
        }
        let namespace = tracked_in.unwrap_or(namespace);

        let Some(state) = self.namespaces.get_mut(&namespace) else {
            tracing::debug!(
                "Ignoring message for core {:?} in untracked namespace {}",
                discovery_key,
                namespace
            );
            return None;
        };
        Some(state.core_or_insert(discovery_key))
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.controllers
            .values()
            .filter_map(PeerSyncController::next_deadline)
            .chain(self.pending_keys.next_deadline())
            .min()
    }

    fn expire_discovery_keys(&mut self, now: Instant) {
        for (connection_id, discovery_key) in self.pending_keys.expire(now) {
            tracing::debug!(
                "Dropped queued discovery key {:?} for {}: peer never added",
                discovery_key,
                connection_id
            );
        }
        for controller in self.controllers.values_mut() {
            controller.expire(now);
        }
    }
}

async fn resolve_capabilities(
    roles: &dyn RoleProvider,
    peer_id: &PeerId,
    config: &SyncConfig,
) -> CapabilityMap {
    let mut capabilities = CapabilityMap::new();
    for &namespace in config.namespaces.all() {
        let capability = roles.sync_capability(peer_id, namespace).await;
        capabilities.insert(namespace, capability);
    }
    capabilities
}

/// Current time on the runtime's clock (virtual when paused in tests).
fn now() -> Instant {
    time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
