// tests/unit_updater_test.rs

//! Reconciler behavior: sweeps, couple materialisation and bookkeeping.

#[path = "integration/mastermind_helpers.rs"]
mod mastermind_helpers;

use mastermind::core::keys;
use mastermind::core::topology::{CoupleId, CoupleMeta, Status};
use mastermind_helpers::{META_GROUP, TestCluster};

#[tokio::test]
async fn test_couple_formation_from_symmetric_metadata() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    let state = cluster.state.read();
    let id = CoupleId::new([1, 2, 3]);
    let couple = state.couples.get(&id).expect("couple materialised");
    assert_eq!(couple.status, Status::Ok);
    assert_eq!(state.couple_namespace(&id).as_deref(), Some("web"));
    for gid in [1, 2, 3] {
        let group = state.groups.get(&gid).unwrap();
        assert_eq!(group.status, Status::Coupled);
        assert_eq!(group.couple, Some(id.clone()));
    }
}

#[tokio::test]
async fn test_referenced_peers_are_materialised_as_placeholders() {
    let cluster = TestCluster::new();
    // Only group 1 is known from statistics, but its meta names 2 and 3.
    cluster.feed_group(1);
    cluster.put_group_meta(1, &[1, 2, 3], "web");
    cluster.sweep().await;

    let state = cluster.state.read();
    assert!(state.groups.contains(&2));
    assert!(state.groups.contains(&3));
    assert!(state.couples.contains(&CoupleId::new([1, 2, 3])));
    // The placeholders carry no metadata yet, so the members disagree.
    assert_eq!(
        state.couples.get(&CoupleId::new([1, 2, 3])).unwrap().status,
        Status::Bad
    );
}

#[tokio::test]
async fn test_group_without_metadata_ends_up_uncoupled() {
    let cluster = TestCluster::new();
    cluster.feed_group(7);
    cluster.sweep().await;

    let state = cluster.state.read();
    let group = state.groups.get(&7).unwrap();
    assert!(group.meta.is_none());
    assert!(group.couple.is_none());
    // No coupling info: the group stays in INIT rather than BAD.
    assert_eq!(group.status, Status::Init);
}

#[tokio::test]
async fn test_couple_meta_sweep_applies_frozen_flag() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    let id = CoupleId::new([1, 2, 3]);
    let blob = CoupleMeta { frozen: true }.pack().unwrap();
    cluster
        .backend
        .put(META_GROUP, &keys::couple_meta_key(&id), blob);
    cluster.sweep().await;

    let state = cluster.state.read();
    assert_eq!(state.couples.get(&id).unwrap().status, Status::Frozen);
}

#[tokio::test]
async fn test_conflicting_metadata_marks_couple_bad() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    // Group 3 suddenly claims a different namespace.
    cluster.put_group_meta(3, &[1, 2, 3], "photos");
    cluster.sweep().await;

    let state = cluster.state.read();
    let couple = state.couples.get(&CoupleId::new([1, 2, 3])).unwrap();
    assert_eq!(couple.status, Status::Bad);
}

#[tokio::test]
async fn test_load_nodes_advances_max_group() {
    let cluster = TestCluster::new();
    cluster
        .backend
        .set_stat_rows(vec![TestCluster::raw_row("10.0.0.9:1025", 9)]);

    cluster.updater.clone().load_nodes(false).await;

    let stored = cluster
        .backend
        .get(META_GROUP, keys::MASTERMIND_MAX_GROUP_KEY)
        .expect("max group written");
    assert_eq!(String::from_utf8(stored).unwrap(), "9");
}

#[tokio::test]
async fn test_force_nodes_update_queues_reload() {
    let cluster = TestCluster::new();
    cluster.queue.start();
    cluster
        .backend
        .set_stat_rows(vec![TestCluster::raw_row("10.0.0.5:1025", 5)]);

    assert!(cluster.updater.clone().force_nodes_update());
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(cluster.state.read().groups.contains(&5));
    cluster.queue.shutdown();
}
