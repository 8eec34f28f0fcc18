// tests/unit_balancer_test.rs

//! Operator handler behavior: repair, break, couple composition, freeze
//! lifecycle, group number allocation and node detachment.

#[path = "integration/mastermind_helpers.rs"]
mod mastermind_helpers;

use std::collections::{HashMap, HashSet};

use mastermind::core::keys;
use mastermind::core::topology::{CoupleId, Status};
use mastermind_helpers::{META_GROUP, TestCluster};

#[tokio::test]
async fn test_repair_refused_on_good_couple() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    let err = cluster.balancer.repair_groups(1, None).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot repair, group 1 is in couple 1:2:3"
    );
}

#[tokio::test]
async fn test_repair_unknown_group() {
    let cluster = TestCluster::new();
    let err = cluster.balancer.repair_groups(42, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Group 42 is not found");
}

#[tokio::test]
async fn test_repair_rewrites_missing_member_meta() {
    let cluster = TestCluster::new();
    // Groups 2 and 3 carry the couple meta; group 1 lost its copy.
    for gid in [1, 2, 3] {
        cluster.feed_group(gid);
    }
    cluster.put_group_meta(2, &[1, 2, 3], "web");
    cluster.put_group_meta(3, &[1, 2, 3], "web");
    cluster.sweep().await;

    {
        let state = cluster.state.read();
        assert_ne!(
            state.couples.get(&CoupleId::new([1, 2, 3])).unwrap().status,
            Status::Ok
        );
    }

    let reply = cluster.balancer.repair_groups(1, None).await.unwrap();
    assert_eq!(reply.couple, "1:2:3");
    assert!(
        cluster
            .backend
            .get(1, keys::SYMMETRIC_GROUPS_KEY)
            .is_some(),
        "repair must write the symmetric key into the broken member"
    );
    assert_eq!(
        cluster
            .state
            .read()
            .couples
            .get(&CoupleId::new([1, 2, 3]))
            .unwrap()
            .status,
        Status::Ok
    );
}

#[tokio::test]
async fn test_break_couple_with_wrong_confirmation() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    // Missing the comma after "Yes".
    let err = cluster
        .balancer
        .break_couple(vec![3, 1, 2], "Yes I want to break good couple 1:2:3", false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Incorrect confirmation string");
    assert!(
        cluster
            .state
            .read()
            .couples
            .contains(&CoupleId::new([1, 2, 3]))
    );
}

#[tokio::test]
async fn test_break_couple_removes_keys_and_couple() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;

    let ok = cluster
        .balancer
        .break_couple(
            vec![1, 2, 3],
            "[Yes, I want to break good couple 1:2:3]",
            false,
        )
        .await
        .unwrap();
    assert!(ok);

    assert!(
        !cluster
            .state
            .read()
            .couples
            .contains(&CoupleId::new([1, 2, 3]))
    );
    for gid in [1, 2, 3] {
        assert!(cluster.backend.get(gid, keys::SYMMETRIC_GROUPS_KEY).is_none());
        assert!(cluster.state.read().groups.get(&gid).unwrap().couple.is_none());
    }
}

#[tokio::test]
async fn test_break_couple_force_skips_confirmation() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[4, 5], "web").await;

    assert!(
        cluster
            .balancer
            .break_couple(vec![5, 4], "", true)
            .await
            .unwrap()
    );
}

fn diverse_dcs() -> HashMap<String, String> {
    HashMap::from([
        ("10.0.0.10".to_string(), "dcA".to_string()),
        ("10.0.0.11".to_string(), "dcA".to_string()),
        ("10.0.0.12".to_string(), "dcB".to_string()),
        ("10.0.0.13".to_string(), "dcC".to_string()),
    ])
}

#[tokio::test]
async fn test_couple_groups_requires_distinct_dcs() {
    let cluster = TestCluster::with_dcs(diverse_dcs(), None);
    for gid in [10, 11, 12, 13] {
        cluster.feed_group(gid);
    }
    cluster.sweep().await;

    let chosen = cluster
        .balancer
        .couple_groups(3, vec![], "web")
        .await
        .unwrap();
    assert_eq!(chosen.len(), 3);
    let dcs: HashSet<&str> = chosen
        .iter()
        .map(|gid| match gid {
            10 | 11 => "dcA",
            12 => "dcB",
            13 => "dcC",
            _ => panic!("unexpected group {gid}"),
        })
        .collect();
    assert_eq!(dcs.len(), 3, "one group per datacenter");

    let state = cluster.state.read();
    let id = CoupleId::new(chosen.iter().copied());
    assert!(state.couples.contains(&id));
    for gid in &chosen {
        assert!(cluster.backend.get(*gid, keys::SYMMETRIC_GROUPS_KEY).is_some());
    }
}

#[tokio::test]
async fn test_couple_groups_rejects_same_dc_mandatory() {
    let cluster = TestCluster::with_dcs(diverse_dcs(), None);
    for gid in [10, 11, 12, 13] {
        cluster.feed_group(gid);
    }
    cluster.sweep().await;

    let err = cluster
        .balancer
        .couple_groups(3, vec![10, 11], "web")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "groups must be in different dcs");
}

#[tokio::test]
async fn test_couple_groups_not_enough_dcs() {
    let cluster = TestCluster::with_dcs(diverse_dcs(), None);
    for gid in [10, 11, 12, 13] {
        cluster.feed_group(gid);
    }
    cluster.sweep().await;

    let err = cluster
        .balancer
        .couple_groups(4, vec![], "web")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Not enough dcs");
}

#[tokio::test]
async fn test_couple_groups_too_many_mandatory() {
    let cluster = TestCluster::with_dcs(diverse_dcs(), None);
    for gid in [10, 11, 12, 13] {
        cluster.feed_group(gid);
    }
    cluster.sweep().await;

    let err = cluster
        .balancer
        .couple_groups(2, vec![10, 12, 13], "web")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Too many mandatory groups");
}

#[tokio::test]
async fn test_couple_groups_rejects_coupled_mandatory() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2], "web").await;

    let err = cluster
        .balancer
        .couple_groups(2, vec![1], "web")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "group 1 is coupled");
}

#[tokio::test]
async fn test_freeze_lifecycle() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;
    let id = CoupleId::new([1, 2, 3]);

    assert!(cluster.balancer.freeze_couple(&id).await.unwrap());
    {
        let state = cluster.state.read();
        assert_eq!(state.couples.get(&id).unwrap().status, Status::Frozen);
    }

    // Frozen couples are healthy but closed for writes: not bad, not
    // closed-by-space, and absent from the weight tables.
    assert!(cluster.balancer.get_bad_groups().is_empty());
    assert!(cluster.balancer.get_closed_groups().is_empty());
    assert!(cluster.balancer.get_group_weights().is_empty());
    assert_eq!(
        cluster.balancer.get_frozen_groups(),
        vec![vec![1, 2, 3]]
    );

    let err = cluster.balancer.freeze_couple(&id).await.unwrap_err();
    assert_eq!(err.to_string(), "Couple 1:2:3 is already frozen");

    assert!(cluster.balancer.unfreeze_couple(&id).await.unwrap());
    assert_eq!(
        cluster.state.read().couples.get(&id).unwrap().status,
        Status::Ok
    );
    let err = cluster.balancer.unfreeze_couple(&id).await.unwrap_err();
    assert_eq!(err.to_string(), "Couple 1:2:3 is not frozen");
}

#[tokio::test]
async fn test_get_group_weights_ranks_ok_couples() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2], "web").await;
    cluster.make_ok_couple(&[3, 4], "web").await;

    let weights = cluster.balancer.get_group_weights();
    let buckets = weights.get("web").expect("namespace bucket");
    let entries = buckets.get(&2).expect("size bucket");
    assert_eq!(entries.len(), 2);
    assert!(entries[0].1 >= entries[1].1, "sorted by descending weight");
    for entry in entries {
        assert!(entry.2 > 0, "free space is reported");
    }
}

#[tokio::test]
async fn test_closed_couple_is_excluded_from_weights() {
    let cluster = TestCluster::new();
    // 30,000 free blocks of 4 KB is ~117 MB, below the 256 MB threshold.
    for gid in [1, 2] {
        let row = TestCluster::raw_row_with_space(&TestCluster::node_addr(gid), gid, 30_000);
        cluster.feed_rows(&[row]);
        cluster.put_group_meta(gid, &[1, 2], "web");
    }
    cluster.sweep().await;

    assert_eq!(
        cluster.state.read().couples.get(&CoupleId::new([1, 2])).unwrap().status,
        Status::Ok
    );
    assert_eq!(cluster.balancer.get_closed_groups(), vec![vec![1, 2]]);
    assert!(cluster.balancer.get_group_weights().is_empty());
}

#[tokio::test]
async fn test_get_next_group_number() {
    let cluster = TestCluster::new();

    assert!(cluster.balancer.get_next_group_number(0).await.unwrap().is_empty());
    assert!(
        cluster
            .backend
            .get(META_GROUP, keys::MASTERMIND_MAX_GROUP_KEY)
            .is_none(),
        "allocating zero groups must not touch max_group"
    );

    assert_eq!(
        cluster.balancer.get_next_group_number(5).await.unwrap(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(
        cluster.balancer.get_next_group_number(2).await.unwrap(),
        vec![6, 7]
    );

    assert!(cluster.balancer.get_next_group_number(101).await.is_err());
    assert!(cluster.balancer.get_next_group_number(-1).await.is_err());
}

#[tokio::test]
async fn test_group_detach_node_records_history() {
    let cluster = TestCluster::new();
    cluster.feed_group(7);
    let addr = TestCluster::node_addr(7);

    assert!(cluster.balancer.group_detach_node(7, &addr).unwrap());
    {
        let state = cluster.state.read();
        assert!(state.groups.get(&7).unwrap().nodes.is_empty());
        assert!(state.nodes.get(&addr).unwrap().destroyed);
    }

    let history = cluster.balancer.get_group_history(7).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].reason.contains(&addr));

    let err = cluster.balancer.group_detach_node(7, &addr).unwrap_err();
    assert!(err.to_string().contains("not found in group"));
}

#[tokio::test]
async fn test_info_queries() {
    let cluster = TestCluster::new();
    cluster.make_ok_couple(&[1, 2, 3], "web").await;
    cluster.feed_group(9);

    assert_eq!(cluster.balancer.get_symmetric_groups(), vec![vec![1, 2, 3]]);
    assert!(cluster.balancer.get_bad_groups().is_empty());
    assert_eq!(cluster.balancer.get_empty_groups(), vec![9]);
    assert_eq!(
        cluster.balancer.couples_by_namespace("web"),
        vec![vec![1, 2, 3]]
    );
    assert!(cluster.balancer.couples_by_namespace("photos").is_empty());

    let info = cluster.balancer.get_group_info(1).unwrap();
    assert_eq!(info.status, Status::Coupled);
    assert_eq!(info.couples, Some(vec![1, 2, 3]));
    assert_eq!(info.namespace.as_deref(), Some("web"));
    assert_eq!(info.nodes.len(), 1);

    let couple_info = cluster
        .balancer
        .get_couple_info(&CoupleId::new([1, 2, 3]))
        .unwrap();
    assert_eq!(couple_info.id, "1:2:3");
    assert_eq!(couple_info.status, Status::Ok);
    assert!(!couple_info.frozen);
    assert!(couple_info.free_space.unwrap() > 0);

    let by_dc = cluster.balancer.groups_by_dc();
    assert_eq!(by_dc.get("dc1").map(|g| g.len()), Some(4));
}
