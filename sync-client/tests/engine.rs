//! End-to-end behaviour of the sync engine through its public handles,
//! using mock cores and connections on a paused clock.

use offgrid_sync_client::{
    ConnectionId, Core, MockConnection, MockCore, PeerConnection, StaticRoles, SyncApi,
    SyncConfig, SyncDriver,
};
use offgrid_sync_core::{Bitfield, PeerNamespaceStatus};
use offgrid_sync_types::{
    BlockRange, DiscoveryKey, Namespace, PeerId, PreHaveMessage, SyncCapability, SyncError,
    SyncType,
};
use std::sync::Arc;
use std::time::Duration;

const PEER_KEY: [u8; 32] = [9; 32];

struct Harness {
    api: SyncApi,
    driver: SyncDriver,
    roles: Arc<StaticRoles>,
    connection: MockConnection,
    peer_id: PeerId,
}

fn harness(config: SyncConfig) -> Harness {
    let roles = Arc::new(StaticRoles::allow_all());
    let (api, driver) = SyncApi::spawn(config, roles.clone()).unwrap();
    Harness {
        api,
        driver,
        roles,
        connection: MockConnection::new(1, PEER_KEY),
        peer_id: PeerId::from_public_key(&PEER_KEY),
    }
}

impl Harness {
    fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }
}

/// Let the engine drain its queue and any throttled recomputation run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

fn full(length: u64) -> Bitfield {
    let mut bitfield = Bitfield::new();
    bitfield.set_range(0, length, true);
    bitfield
}

#[tokio::test(start_paused = true)]
async fn presync_then_all_then_back() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::complete([1; 32], 2);
    let data = MockCore::complete([2; 32], 2);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    settle().await;

    let state = h.api.state();
    assert!(state.initial.is_sync_enabled);
    assert!(!state.data.is_sync_enabled);
    assert!(h.connection.is_replicating(&auth.discovery_key()));
    assert!(!h.connection.is_replicating(&data.discovery_key()));

    h.api.start().unwrap();
    settle().await;
    assert!(h.api.state().data.is_sync_enabled);
    assert!(h.connection.is_replicating(&data.discovery_key()));

    h.api.stop().unwrap();
    settle().await;
    assert!(!h.api.state().data.is_sync_enabled);
    assert!(h.connection.is_replicating(&auth.discovery_key()));
    assert!(!h.connection.is_replicating(&data.discovery_key()));
}

#[tokio::test(start_paused = true)]
async fn wait_for_sync_resolves_after_download() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::new([1; 32], 4);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    auth.connect_peer(h.peer_id, full(4));
    settle().await;

    let api = h.api.clone();
    let waiter = tokio::spawn(async move { api.wait_for_sync(SyncType::Initial).await });
    settle().await;
    assert!(!waiter.is_finished());

    for index in 0..4 {
        auth.download(index);
    }
    settle().await;
    waiter.await.unwrap().unwrap();

    let ns = h.api.namespace_state(Namespace::Auth).await.unwrap().unwrap();
    assert_eq!(ns.local_state.have, 4);
    assert!(!ns.data_to_sync);
    assert_eq!(ns.remote_states[&h.peer_id].status, PeerNamespaceStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn autostop_stops_idle_data_sync() {
    let h = harness(SyncConfig::default());
    let data = MockCore::complete([2; 32], 2);
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    data.connect_peer(h.peer_id, full(2));
    let mut events = h.api.subscribe();

    h.api
        .start_with_autostop(Some(Duration::from_secs(10)))
        .unwrap();
    settle().await;
    assert!(h.api.state().data.is_sync_enabled);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!h.api.state().data.is_sync_enabled);
    assert!(!h.connection.is_replicating(&data.discovery_key()));

    let mut last = None;
    while let Ok(state) = events.try_recv() {
        last = Some(state);
    }
    assert_eq!(last.map(|s| s.data.is_sync_enabled), Some(false));
}

#[tokio::test(start_paused = true)]
async fn new_data_postpones_autostop() {
    let h = harness(SyncConfig {
        autostop_data_sync_after_ms: Some(10_000),
        ..SyncConfig::default()
    });
    let data = MockCore::complete([2; 32], 2);
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    data.connect_peer(h.peer_id, full(2));
    h.api.start().unwrap();
    settle().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    // The peer now lacks a block we have, so we are no longer synced.
    data.append(1);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.api.state().data.is_sync_enabled);

    data.peer_has_range(h.peer_id, BlockRange::new(2, 1));
    settle().await;
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(h.api.state().data.is_sync_enabled);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.api.state().data.is_sync_enabled);
}

#[tokio::test(start_paused = true)]
async fn disabling_autostop_keeps_data_sync_running() {
    let h = harness(SyncConfig::default());
    let data = MockCore::complete([2; 32], 1);
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.api
        .start_with_autostop(Some(Duration::from_secs(1)))
        .unwrap();
    h.api.set_autostop_data_sync_timeout(None).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.api.state().data.is_sync_enabled);
}

#[tokio::test(start_paused = true)]
async fn blocked_peer_is_not_replicated_and_does_not_block_sync() {
    let h = harness(SyncConfig::default());
    h.roles.block_peer(h.peer_id);
    let auth = MockCore::complete([1; 32], 2);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    settle().await;

    assert!(h.connection.replicating().is_empty());
    h.api.wait_for_sync(SyncType::Full).await.unwrap();

    let device = &h.api.state().device_sync_state[&h.peer_id];
    assert!(!device.initial.is_enabled);
}

#[tokio::test(start_paused = true)]
async fn role_change_applies_on_next_evaluation() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::complete([1; 32], 2);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    settle().await;
    assert!(h.connection.is_replicating(&auth.discovery_key()));

    h.roles
        .set(h.peer_id, Namespace::Auth, SyncCapability::Blocked);
    h.api.start().unwrap();
    settle().await;
    assert!(!h.connection.is_replicating(&auth.discovery_key()));
}

#[tokio::test(start_paused = true)]
async fn full_stop_holds_none_until_rescinded() {
    let h = harness(SyncConfig::default());
    h.driver.request_full_stop().unwrap();
    settle().await;
    assert!(!h.api.state().initial.is_sync_enabled);

    // New presync data arrives while held; the hold keeps everything off.
    let auth = MockCore::new([1; 32], 2);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    auth.connect_peer(h.peer_id, full(2));
    settle().await;
    assert!(!h.api.state().initial.is_sync_enabled);
    assert!(h.connection.replicating().is_empty());

    h.driver.rescind_full_stop().unwrap();
    settle().await;
    assert!(h.api.state().initial.is_sync_enabled);
    assert!(h.connection.is_replicating(&auth.discovery_key()));
}

#[tokio::test(start_paused = true)]
async fn full_stop_waits_for_initial_sync() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::new([1; 32], 1);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    auth.connect_peer(h.peer_id, full(1));
    settle().await;

    h.driver.request_full_stop().unwrap();
    settle().await;
    assert!(h.api.state().initial.is_sync_enabled);

    auth.download(0);
    settle().await;
    assert!(!h.api.state().initial.is_sync_enabled);
    assert!(h.connection.replicating().is_empty());
}

#[tokio::test(start_paused = true)]
async fn discovery_key_before_core_is_replicated_once_added() {
    let h = harness(SyncConfig::default());
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    h.api.start().unwrap();
    let blob = MockCore::complete([5; 32], 1);
    h.driver
        .handle_discovery_key(h.connection_id(), blob.discovery_key())
        .unwrap();
    settle().await;
    assert!(h.connection.replicating().is_empty());

    h.driver.add_core(Namespace::Blob, Arc::new(blob.clone())).await.unwrap();
    settle().await;
    assert!(h.connection.is_replicating(&blob.discovery_key()));
}

#[tokio::test(start_paused = true)]
async fn discovery_key_before_peer_is_queued() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::complete([1; 32], 1);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver
        .handle_discovery_key(h.connection_id(), auth.discovery_key())
        .unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    settle().await;
    assert!(h.connection.is_replicating(&auth.discovery_key()));

    h.driver.remove_peer(h.connection_id()).unwrap();
    settle().await;
    assert!(h.api.state().device_sync_state.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pre_haves_count_once_core_is_attached() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::new([1; 32], 4);
    h.driver
        .handle_pre_haves(
            h.peer_id,
            PreHaveMessage {
                discovery_key: auth.discovery_key(),
                namespace: Namespace::Auth,
                start: 0,
                words: vec![0b1111],
            },
        )
        .unwrap();
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    settle().await;

    let ns = h.api.namespace_state(Namespace::Auth).await.unwrap().unwrap();
    assert_eq!(ns.core_count, 1);
    assert_eq!(ns.local_state.want, 4);
    assert_eq!(ns.remote_states[&h.peer_id].state.have, 4);
    assert!(ns.data_to_sync);
}

#[tokio::test(start_paused = true)]
async fn peer_wants_limit_what_we_owe() {
    let h = harness(SyncConfig::default());
    let data = MockCore::complete([2; 32], 8);
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    data.connect_peer(h.peer_id, Bitfield::new());
    h.driver
        .set_peer_wants(
            Namespace::Data,
            data.discovery_key(),
            h.peer_id,
            vec![BlockRange::new(0, 3)],
        )
        .unwrap();
    settle().await;

    let ns = h.api.namespace_state(Namespace::Data).await.unwrap().unwrap();
    assert_eq!(ns.local_state.wanted, 3);
    assert_eq!(ns.remote_states[&h.peer_id].state.want, 3);

    let device = &h.api.state().device_sync_state[&h.peer_id];
    assert_eq!(device.data.want, 3);
}

#[tokio::test(start_paused = true)]
async fn wants_before_core_apply_once_attached() {
    let h = harness(SyncConfig::default());
    let data = MockCore::complete([2; 32], 8);
    h.driver
        .set_peer_wants(
            Namespace::Data,
            data.discovery_key(),
            h.peer_id,
            vec![BlockRange::new(0, 2)],
        )
        .unwrap();
    settle().await;
    let ns = h.api.namespace_state(Namespace::Data).await.unwrap().unwrap();
    assert_eq!(ns.core_count, 1);

    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    data.connect_peer(h.peer_id, Bitfield::new());
    settle().await;

    let ns = h.api.namespace_state(Namespace::Data).await.unwrap().unwrap();
    assert_eq!(ns.core_count, 1);
    assert_eq!(ns.local_state.wanted, 2);
    assert_eq!(ns.remote_states[&h.peer_id].state.want, 2);
}

#[tokio::test(start_paused = true)]
async fn wants_for_untracked_namespace_are_rejected() {
    let config = SyncConfig::from_toml_str(
        r#"
[namespaces]
all = ["auth"]
presync = ["auth"]
"#,
    )
    .unwrap();
    let h = harness(config);
    let err = h
        .driver
        .set_peer_wants(
            Namespace::Data,
            DiscoveryKey::from_array([4; 32]),
            h.peer_id,
            vec![BlockRange::new(0, 1)],
        )
        .unwrap_err();
    assert_eq!(err, SyncError::UntrackedNamespace(Namespace::Data));
}

#[tokio::test(start_paused = true)]
async fn pre_haves_follow_the_namespace_of_an_attached_core() {
    let h = harness(SyncConfig::default());
    let auth = MockCore::new([1; 32], 4);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver
        .handle_pre_haves(
            h.peer_id,
            PreHaveMessage {
                discovery_key: auth.discovery_key(),
                namespace: Namespace::Config,
                start: 0,
                words: vec![0b0011],
            },
        )
        .unwrap();
    settle().await;

    let config = h.api.namespace_state(Namespace::Config).await.unwrap().unwrap();
    assert_eq!(config.core_count, 0);
    assert!(config.remote_states.is_empty());

    let ns = h.api.namespace_state(Namespace::Auth).await.unwrap().unwrap();
    assert_eq!(ns.core_count, 1);
    assert_eq!(ns.local_state.want, 2);
    assert_eq!(ns.remote_states[&h.peer_id].state.have, 2);
}

#[tokio::test(start_paused = true)]
async fn blocked_namespace_gets_no_peer_record() {
    let h = harness(SyncConfig::default());
    h.roles
        .set(h.peer_id, Namespace::Data, SyncCapability::Blocked);
    let auth = MockCore::complete([1; 32], 2);
    let data = MockCore::complete([2; 32], 2);
    h.driver.add_core(Namespace::Auth, Arc::new(auth.clone())).await.unwrap();
    h.driver.add_core(Namespace::Data, Arc::new(data.clone())).await.unwrap();
    h.driver.add_peer(Arc::new(h.connection.clone())).unwrap();
    settle().await;

    let auth_ns = h.api.namespace_state(Namespace::Auth).await.unwrap().unwrap();
    assert_eq!(
        auth_ns.remote_states[&h.peer_id].status,
        PeerNamespaceStatus::Disconnected
    );
    // Registered but silent: assumed to want everything we have.
    assert_eq!(auth_ns.local_state.wanted, 2);

    let data_ns = h.api.namespace_state(Namespace::Data).await.unwrap().unwrap();
    assert!(data_ns.remote_states.is_empty());
    assert!(!data_ns.data_to_sync);
}

#[tokio::test(start_paused = true)]
async fn updates_counter_advances() {
    let h = harness(SyncConfig::default());
    let mut updates = h.api.updates();
    updates.changed().await.unwrap();
    let first = *updates.borrow_and_update();

    h.api.start().unwrap();
    updates.changed().await.unwrap();
    assert!(*updates.borrow() > first);
}
