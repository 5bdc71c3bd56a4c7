//! ZoneSyncManager over the in-memory authority

use crate::config::Config;
use crate::core_sync::{ConflictPolicy, ProximityEvent, SyncError, SyncStatus, ZoneSyncManager};
use crate::core_transport::{memory_pair, ConnectionStatus, MemoryAuthority, MessageKind};
use crate::core_zone::{ZoneDelta, ZoneSnapshot};
use crate::test_utils::{wait_for_watch, zone, test_config, TEST_GAME};
use std::sync::{Arc, Mutex};

fn start(config: Config, initial: ZoneSnapshot) -> (ZoneSyncManager, MemoryAuthority) {
    let (connector, authority) = memory_pair();
    let (manager, _task) = ZoneSyncManager::spawn("zone-m", initial, &config, Arc::new(connector));
    (manager, authority)
}

async fn wait_status(manager: &ZoneSyncManager, status: SyncStatus) {
    let mut rx = manager.watch();
    wait_for_watch(&mut rx, |s| s.sync_status == status).await;
}

#[tokio::test]
async fn test_local_change_sent_and_acked() {
    let (manager, mut authority) = start(test_config(ConflictPolicy::Server), zone(&[]));
    let mut peer = authority.accept().await.unwrap();
    wait_status(&manager, SyncStatus::Synced).await;

    let state = manager.submit_local_change(ZoneDelta::local().add("h1")).await.unwrap();
    assert_eq!(state.pending_changes.len(), 1);
    assert!(state.current_zone.contains(&"h1".into()));
    assert_eq!(state.sync_status, SyncStatus::Syncing);

    let sent = peer.next_envelope().await.unwrap();
    assert_eq!(sent.kind, MessageKind::ZoneDelta);
    assert_eq!(sent.message_id, state.pending_changes[0].message_id);
    assert_eq!(sent.game_id, TEST_GAME);
    assert!(peer.ack(&sent).await);

    wait_status(&manager, SyncStatus::Synced).await;
    let state = manager.get_state();
    assert!(state.pending_changes.is_empty());
    assert!(state.last_sync_time.is_some());
}

#[tokio::test]
async fn test_authority_delta_conflict_rolls_back() {
    let (manager, mut authority) = start(test_config(ConflictPolicy::Server), zone(&["h1"]));
    let mut peer = authority.accept().await.unwrap();
    wait_status(&manager, SyncStatus::Synced).await;

    let state = manager.submit_local_change(ZoneDelta::local().remove("h1")).await.unwrap();
    assert!(!state.current_zone.contains(&"h1".into()));
    let _sent = peer.next_envelope().await.unwrap();

    assert!(peer.push_delta(&ZoneDelta::server().modify("h1"), TEST_GAME).await);
    wait_status(&manager, SyncStatus::Conflict).await;

    let state = manager.get_state();
    assert_eq!(state.conflict_count, 1);
    assert!(state.current_zone.contains(&"h1".into()));
    assert!(state.last_server_update.is_some());

    let state = manager.clear_conflicts().await.unwrap();
    assert_eq!(state.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_disconnected_edits_flush_in_order() {
    let (manager, mut authority) = start(test_config(ConflictPolicy::Server), zone(&[]));
    let _first = authority.accept().await.unwrap();
    wait_status(&manager, SyncStatus::Synced).await;

    manager.disconnect().unwrap();
    wait_status(&manager, SyncStatus::Disconnected).await;

    let a = manager.submit_local_change(ZoneDelta::local().add("a")).await.unwrap();
    let b = manager.submit_local_change(ZoneDelta::local().add("b")).await.unwrap();
    assert_eq!(b.sync_status, SyncStatus::Disconnected);
    assert_eq!(b.pending_changes.len(), 2);

    let mut info = manager.transport().watch_info();
    wait_for_watch(&mut info, |i| i.queued == 2).await;

    manager.connect().unwrap();
    let mut peer = authority.accept().await.unwrap();
    let first = peer.next_envelope().await.unwrap();
    let second = peer.next_envelope().await.unwrap();
    assert_eq!(first.message_id, a.pending_changes[0].message_id);
    assert_eq!(second.message_id, b.pending_changes[1].message_id);

    let info = wait_for_watch(&mut info, |i| i.status == ConnectionStatus::Connected).await;
    assert_eq!(info.reconnect_attempts, 0);
    wait_status(&manager, SyncStatus::Syncing).await;
}

#[tokio::test]
async fn test_superseded_change_never_transmitted_while_offline() {
    let mut config = test_config(ConflictPolicy::Server);
    config.transport.auto_connect = false;
    let (manager, mut authority) = start(config, zone(&[]));

    manager.submit_local_change(ZoneDelta::local().add("a")).await.unwrap();
    let latest = manager.submit_local_change(ZoneDelta::local().remove("a")).await.unwrap();
    assert_eq!(latest.pending_changes.len(), 1);

    manager.connect().unwrap();
    let mut peer = authority.accept().await.unwrap();
    let only = peer.next_envelope().await.unwrap();
    assert_eq!(only.message_id, latest.pending_changes[0].message_id);
    assert!(only.delta().unwrap().removed.contains(&"a".into()));
}

#[tokio::test]
async fn test_subscribers_see_every_state_in_order() {
    let mut config = test_config(ConflictPolicy::Server);
    config.transport.auto_connect = false;
    let (manager, _authority) = start(config, zone(&[]));

    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = manager
        .subscribe(move |state| sink.lock().unwrap().push(state.version))
        .await
        .unwrap();

    manager.submit_local_change(ZoneDelta::local().add("a")).await.unwrap();
    manager.submit_local_change(ZoneDelta::local().add("b")).await.unwrap();
    assert!(manager.unsubscribe(id).await.unwrap());
    assert!(!manager.unsubscribe(id).await.unwrap());
    manager.submit_local_change(ZoneDelta::local().add("c")).await.unwrap();

    let versions = seen.lock().unwrap().clone();
    // Initial delivery plus two changes, strictly increasing
    assert_eq!(versions.len(), 3);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    assert!(manager.get_state().version > versions[2]);
}

#[tokio::test]
async fn test_proximity_and_zone_submission() {
    let mut config = test_config(ConflictPolicy::Server);
    config.transport.auto_connect = false;
    let (manager, _authority) = start(config, zone(&["a"]));

    let state = manager.on_proximity_event(ProximityEvent::Entered("b".into())).await.unwrap();
    assert!(state.current_zone.contains(&"b".into()));

    let state = manager.submit_zone(zone(&["c"])).await.unwrap();
    assert_eq!(state.current_zone, zone(&["c"]));
}

#[tokio::test]
async fn test_invalid_delta_rejected() {
    let mut config = test_config(ConflictPolicy::Server);
    config.transport.auto_connect = false;
    let (manager, _authority) = start(config, zone(&[]));
    let before = manager.get_state();

    let result = manager.submit_local_change(ZoneDelta::local().add("x").remove("x")).await;
    assert!(matches!(result, Err(SyncError::InvalidDelta(_))));
    assert_eq!(manager.get_state(), before);
}

#[tokio::test]
async fn test_shutdown_closes_transport() {
    let (manager, mut authority) = start(test_config(ConflictPolicy::Server), zone(&[]));
    let _peer = authority.accept().await.unwrap();

    manager.shutdown().await.unwrap();
    let mut info = manager.transport().watch_info();
    wait_for_watch(&mut info, |i| i.status == ConnectionStatus::Closed).await;
    assert!(matches!(
        manager.submit_local_change(ZoneDelta::local().add("a")).await,
        Err(SyncError::ManagerClosed)
    ));
}

#[tokio::test]
async fn test_messages_for_other_games_ignored() {
    let (manager, mut authority) = start(test_config(ConflictPolicy::Server), zone(&[]));
    let peer = authority.accept().await.unwrap();
    wait_status(&manager, SyncStatus::Synced).await;

    assert!(peer.push_delta(&ZoneDelta::server().add("foreign"), "other-game").await);
    assert!(peer.push_delta(&ZoneDelta::server().add("ours"), TEST_GAME).await);

    let mut rx = manager.watch();
    let state = wait_for_watch(&mut rx, |s| s.current_zone.contains(&"ours".into())).await;
    assert!(!state.current_zone.contains(&"foreign".into()));
}
