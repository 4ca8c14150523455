//! Public handles to the sync engine.
//!
//! [`SyncApi`] is what the application uses: start and stop sync, wait for
//! it to finish, observe progress. [`SyncDriver`] is what the networking and
//! storage layers use to feed in peers, cores and out-of-band messages.
//! Both are cheap to clone and talk to the same engine task.

use crate::config::SyncConfig;
use crate::connection::{ConnectionId, PeerConnection};
use crate::core::Core;
use crate::engine::{Command, Engine, Outputs};
use crate::roles::RoleProvider;
use offgrid_sync_core::{validate_autostop, NamespaceState};
use offgrid_sync_types::{
    BlockRange, DiscoveryKey, Namespace, NamespaceConfig, PeerId, PreHaveMessage, SyncError,
    SyncState, SyncType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const EVENT_CAPACITY: usize = 64;

/// Application-facing handle.
#[derive(Debug, Clone)]
pub struct SyncApi {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
    events: broadcast::Sender<SyncState>,
    updates: watch::Receiver<u64>,
}

/// Handle for the networking and storage layers.
#[derive(Debug, Clone)]
pub struct SyncDriver {
    commands: mpsc::UnboundedSender<Command>,
    namespaces: NamespaceConfig,
}

impl SyncApi {
    /// Validate `config` and spawn the engine on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn spawn(
        config: SyncConfig,
        roles: Arc<dyn RoleProvider>,
    ) -> Result<(SyncApi, SyncDriver), SyncError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (core_events_tx, core_events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (updates_tx, updates_rx) = watch::channel(0);

        let driver = SyncDriver {
            commands: commands_tx.clone(),
            namespaces: config.namespaces.clone(),
        };
        let api = SyncApi {
            commands: commands_tx,
            state: state_rx,
            events: events_tx.clone(),
            updates: updates_rx,
        };

        let outputs = Outputs {
            state: state_tx,
            events: events_tx,
            updates: updates_tx,
        };
        let engine = Engine::new(config, roles, outputs, core_events_tx);
        tokio::spawn(engine.run(commands_rx, core_events_rx));

        Ok((api, driver))
    }

    /// Sync presync namespaces and data. Uses the current autostop timeout.
    pub fn start(&self) -> Result<(), SyncError> {
        send(&self.commands, Command::Start { autostop: None })
    }

    /// Like [`start`](Self::start), also replacing the autostop timeout
    /// (`None` disables autostop).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidAutostopTimeout`] without starting if the
    /// timeout is out of range.
    pub fn start_with_autostop(&self, autostop: Option<Duration>) -> Result<(), SyncError> {
        let autostop = validate_autostop(autostop)?;
        send(
            &self.commands,
            Command::Start {
                autostop: Some(autostop),
            },
        )
    }

    /// Stop syncing data. Presync namespaces keep syncing unless a full stop
    /// was requested.
    pub fn stop(&self) -> Result<(), SyncError> {
        send(&self.commands, Command::Stop)
    }

    /// Change how long data sync may sit idle before stopping itself.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidAutostopTimeout`] if the timeout is out of
    /// range.
    pub fn set_autostop_data_sync_timeout(
        &self,
        autostop: Option<Duration>,
    ) -> Result<(), SyncError> {
        let autostop = validate_autostop(autostop)?;
        send(&self.commands, Command::SetAutostop(autostop))
    }

    /// Resolve once every namespace in `sync_type` is synced with every
    /// connected, allowed peer.
    pub async fn wait_for_sync(&self, sync_type: SyncType) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        send(&self.commands, Command::WaitForSync { sync_type, reply })?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Last emitted snapshot.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Every snapshot emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncState> {
        self.events.subscribe()
    }

    /// Counter bumped on every emitted snapshot.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }

    /// Aggregated state of one namespace, or `None` if it is not tracked.
    pub async fn namespace_state(
        &self,
        namespace: Namespace,
    ) -> Result<Option<NamespaceState>, SyncError> {
        let (reply, rx) = oneshot::channel();
        send(&self.commands, Command::NamespaceState { namespace, reply })?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Stop the engine. Pending waiters resolve with [`SyncError::Closed`].
    pub fn shutdown(&self) {
        // Already closed is fine.
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl SyncDriver {
    /// A peer connected.
    pub fn add_peer(&self, connection: Arc<dyn PeerConnection>) -> Result<(), SyncError> {
        send(&self.commands, Command::AddPeer(connection))
    }

    /// A peer disconnected.
    pub fn remove_peer(&self, connection_id: ConnectionId) -> Result<(), SyncError> {
        send(&self.commands, Command::RemovePeer(connection_id))
    }

    /// A peer announced a core on a connection.
    pub fn handle_discovery_key(
        &self,
        connection_id: ConnectionId,
        discovery_key: DiscoveryKey,
    ) -> Result<(), SyncError> {
        send(
            &self.commands,
            Command::DiscoveryKey {
                connection_id,
                discovery_key,
            },
        )
    }

    /// Track a local core.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UntrackedNamespace`] if `namespace` is not
    /// configured, or [`SyncError::DiscoveryKeyMismatch`] if the core's
    /// snapshot describes another core.
    pub async fn add_core(&self, namespace: Namespace, core: Arc<dyn Core>) -> Result<(), SyncError> {
        self.check_namespace(namespace)?;
        let (reply, rx) = oneshot::channel();
        send(
            &self.commands,
            Command::AddCore {
                namespace,
                core,
                reply,
            },
        )?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// A peer sent its have bitfield for a core ahead of replication.
    pub fn handle_pre_haves(
        &self,
        peer_id: PeerId,
        message: PreHaveMessage,
    ) -> Result<(), SyncError> {
        self.check_namespace(message.namespace)?;
        send(&self.commands, Command::PreHaves { peer_id, message })
    }

    /// A peer declared which ranges of a core it wants.
    ///
    /// The wants are kept even if the core is not known yet, under
    /// `namespace`, and apply once it is added.
    pub fn set_peer_wants(
        &self,
        namespace: Namespace,
        discovery_key: DiscoveryKey,
        peer_id: PeerId,
        ranges: Vec<BlockRange>,
    ) -> Result<(), SyncError> {
        self.check_namespace(namespace)?;
        send(
            &self.commands,
            Command::PeerWants {
                namespace,
                discovery_key,
                peer_id,
                ranges,
            },
        )
    }

    /// Stop everything, presync included, once the initial sync is done.
    pub fn request_full_stop(&self) -> Result<(), SyncError> {
        send(&self.commands, Command::RequestFullStop)
    }

    /// Withdraw a full-stop request.
    pub fn rescind_full_stop(&self) -> Result<(), SyncError> {
        send(&self.commands, Command::RescindFullStop)
    }

    fn check_namespace(&self, namespace: Namespace) -> Result<(), SyncError> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(SyncError::UntrackedNamespace(namespace))
        }
    }
}

fn send(commands: &mpsc::UnboundedSender<Command>, command: Command) -> Result<(), SyncError> {
    commands.send(command).map_err(|_| SyncError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::StaticRoles;

    fn spawn() -> (SyncApi, SyncDriver) {
        SyncApi::spawn(SyncConfig::default(), Arc::new(StaticRoles::allow_all())).unwrap()
    }

    #[tokio::test]
    async fn invalid_autostop_is_rejected_synchronously() {
        let (api, _driver) = spawn();
        let err = api
            .start_with_autostop(Some(Duration::from_micros(1500)))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidAutostopTimeout { .. }));
        assert!(api.set_autostop_data_sync_timeout(Some(Duration::ZERO)).is_err());
        assert!(api.set_autostop_data_sync_timeout(None).is_ok());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = SyncConfig {
            autostop_data_sync_after_ms: Some(0),
            ..SyncConfig::default()
        };
        let result = SyncApi::spawn(config, Arc::new(StaticRoles::allow_all()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn untracked_namespace_is_rejected() {
        let config = SyncConfig::from_toml_str(
            r#"
[namespaces]
all = ["auth"]
presync = ["auth"]
"#,
        )
        .unwrap();
        let (api, driver) = SyncApi::spawn(config, Arc::new(StaticRoles::allow_all())).unwrap();

        let core = crate::mock::MockCore::new([1; 32], 0);
        let err = driver.add_core(Namespace::Data, Arc::new(core)).await.unwrap_err();
        assert_eq!(err, SyncError::UntrackedNamespace(Namespace::Data));
        assert_eq!(api.namespace_state(Namespace::Data).await.unwrap(), None);
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_closed() {
        let (api, driver) = spawn();
        api.shutdown();
        // Queued behind the shutdown, so dropped unanswered.
        assert_eq!(api.wait_for_sync(SyncType::Initial).await, Err(SyncError::Closed));

        assert_eq!(api.wait_for_sync(SyncType::Full).await, Err(SyncError::Closed));
        assert_eq!(driver.request_full_stop(), Err(SyncError::Closed));
    }
}
