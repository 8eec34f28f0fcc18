// tests/integration/mastermind_helpers.rs

//! Shared fixture for handler-level tests: a full coordinator wired to the
//! in-memory storage backend.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mastermind::config::{BalancerConfig, ReconcilerConfig};
use mastermind::core::balancer::Balancer;
use mastermind::core::balancer::weights::DynamicKnobs;
use mastermind::core::infrastructure::Infrastructure;
use mastermind::core::inventory::{CachedInventory, StaticInventory};
use mastermind::core::keys;
use mastermind::core::namespaces::NamespaceRegistry;
use mastermind::core::session::{MemoryBackend, Session};
use mastermind::core::stats::{RawNodeStat, now_secs};
use mastermind::core::timed_queue::TimedQueue;
use mastermind::core::topology::{ClusterState, GroupId, GroupMeta, ingest};
use mastermind::core::updater::NodeInfoUpdater;
use mastermind::core::worker::Worker;

/// Metadata group id used by the fixture's meta session.
pub const META_GROUP: GroupId = 1000;

pub struct TestCluster {
    pub state: Arc<RwLock<ClusterState>>,
    pub backend: Arc<MemoryBackend>,
    pub storage: Session,
    pub meta: Session,
    pub balancer: Arc<Balancer>,
    pub updater: Arc<NodeInfoUpdater>,
    pub queue: Arc<TimedQueue>,
    pub infrastructure: Arc<Infrastructure>,
}

impl TestCluster {
    /// A cluster whose hosts all resolve to `dc1`.
    pub fn new() -> Self {
        Self::with_dcs(HashMap::new(), Some("dc1".to_string()))
    }

    pub fn with_dcs(dc_by_host: HashMap<String, String>, default_dc: Option<String>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let timeout = Duration::from_secs(5);
        let storage = Session::new(backend.clone(), timeout);
        let meta = Session::new(backend.clone(), timeout).scoped(vec![META_GROUP]);

        let state = Arc::new(RwLock::new(ClusterState::new()));
        let inventory = Arc::new(CachedInventory::new(Arc::new(StaticInventory::new(
            dc_by_host, default_dc,
        ))));
        let infrastructure = Arc::new(Infrastructure::new());
        let knobs = Arc::new(DynamicKnobs::new(180.0));
        let queue = TimedQueue::new();

        let updater = NodeInfoUpdater::new(
            state.clone(),
            storage.clone(),
            meta.clone(),
            queue.clone(),
            ReconcilerConfig::default(),
            knobs.clone(),
        );
        let namespaces = NamespaceRegistry::new(meta.clone());
        let balancer = Arc::new(Balancer::new(
            state.clone(),
            storage.clone(),
            meta.clone(),
            inventory,
            infrastructure.clone(),
            namespaces,
            BalancerConfig::default(),
            knobs,
        ));

        TestCluster {
            state,
            backend,
            storage,
            meta,
            balancer,
            updater,
            queue,
            infrastructure,
        }
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.balancer.clone(), self.updater.clone())
    }

    /// A healthy counter row with plenty of free space.
    pub fn raw_row(addr: &str, group_id: GroupId) -> RawNodeStat {
        Self::raw_row_with_space(addr, group_id, 500_000)
    }

    /// A counter row with `bavail` free blocks out of 1,000,000 (4 KB each).
    pub fn raw_row_with_space(addr: &str, group_id: GroupId, bavail: u64) -> RawNodeStat {
        let mut counters = HashMap::new();
        counters.insert("DNET_CNTR_BLOCKS".to_string(), vec![1_000_000]);
        counters.insert("DNET_CNTR_BSIZE".to_string(), vec![4096]);
        counters.insert("DNET_CNTR_BAVAIL".to_string(), vec![bavail]);
        counters.insert("DNET_CNTR_LA1".to_string(), vec![100]);

        let mut commands = HashMap::new();
        commands.insert("READ".to_string(), vec![0]);
        commands.insert("WRITE".to_string(), vec![0]);

        RawNodeStat {
            addr: addr.to_string(),
            group_id,
            counters,
            storage_commands: commands.clone(),
            proxy_commands: commands,
            read_only: false,
        }
    }

    pub fn node_addr(group_id: GroupId) -> String {
        format!("10.0.0.{group_id}:1025")
    }

    /// Ingests arbitrary counter rows.
    pub fn feed_rows(&self, rows: &[RawNodeStat]) {
        let mut state = self.state.write();
        ingest::update_statistics(&mut state, rows, now_secs());
    }

    /// Ingests one healthy node for the group.
    pub fn feed_node(&self, addr: &str, group_id: GroupId) {
        self.feed_rows(&[Self::raw_row(addr, group_id)]);
    }

    pub fn feed_group(&self, group_id: GroupId) {
        self.feed_node(&Self::node_addr(group_id), group_id);
    }

    /// Seeds a symmetric-groups blob for the group on the backend.
    pub fn put_group_meta(&self, group_id: GroupId, couple: &[GroupId], namespace: &str) {
        let blob = GroupMeta::compose(couple, namespace).pack().unwrap();
        self.backend
            .put(group_id, keys::SYMMETRIC_GROUPS_KEY, blob);
    }

    /// Runs both metadata sweeps once.
    pub async fn sweep(&self) {
        self.updater.update_symm_groups().await;
        self.updater.update_couples_meta().await;
    }

    /// Builds a fully healthy `OK` couple out of the given groups.
    pub async fn make_ok_couple(&self, ids: &[GroupId], namespace: &str) {
        for gid in ids {
            self.feed_group(*gid);
            self.put_group_meta(*gid, ids, namespace);
        }
        self.sweep().await;
    }
}
