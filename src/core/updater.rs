// src/core/updater.rs

//! The metadata reconciliation engine.
//!
//! A periodic full reload (`load_nodes`) pulls fresh per-node counters and
//! queues two metadata sweeps: the per-group symmetric-groups read and the
//! per-couple auxiliary meta read. Errors are isolated per group/couple and
//! never abort a sweep; a timed-out read is treated as a missing key.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::core::MastermindError;
use crate::core::balancer::weights::DynamicKnobs;
use crate::core::keys;
use crate::core::session::{Session, SessionError};
use crate::core::stats::now_secs;
use crate::core::timed_queue::TimedQueue;
use crate::core::topology::couple::CoupleMeta;
use crate::core::topology::{ClusterState, CoupleId, GroupId, ingest};

pub const LOAD_NODES_TASK_ID: &str = "load_nodes";
pub const GROUPS_META_UPDATE_TASK_ID: &str = "update_symms_for_groups";
pub const COUPLES_META_UPDATE_TASK_ID: &str = "update_meta_for_couples";

pub struct NodeInfoUpdater {
    state: Arc<RwLock<ClusterState>>,
    storage: Session,
    meta: Session,
    tq: Arc<TimedQueue>,
    reconciler: ReconcilerConfig,
    knobs: Arc<DynamicKnobs>,
    /// The two most recent reload completion timestamps; their spread feeds
    /// the dynamic staleness knob so slow reloads don't starve the balancer.
    update_timestamps: Mutex<(f64, f64)>,
}

impl NodeInfoUpdater {
    pub fn new(
        state: Arc<RwLock<ClusterState>>,
        storage: Session,
        meta: Session,
        tq: Arc<TimedQueue>,
        reconciler: ReconcilerConfig,
        knobs: Arc<DynamicKnobs>,
    ) -> Arc<Self> {
        let now = now_secs();
        Arc::new(NodeInfoUpdater {
            state,
            storage,
            meta,
            tq,
            reconciler,
            knobs,
            update_timestamps: Mutex::new((now, now)),
        })
    }

    /// Queues the initial full reload. The first run executes the metadata
    /// sweeps inline so the model is usable as soon as possible.
    pub fn start(self: Arc<Self>) {
        let queue = self.tq.clone();
        queue.add_task_in(LOAD_NODES_TASK_ID, Duration::ZERO, move || {
            self.load_nodes(false)
        });
    }

    /// Re-queues the full reload to run immediately, or hurries an already
    /// queued one.
    pub fn force_nodes_update(self: Arc<Self>) -> bool {
        info!("forcing nodes update");
        if !self.tq.hurry(LOAD_NODES_TASK_ID) {
            let queue = self.tq.clone();
            queue.add_task_in(LOAD_NODES_TASK_ID, Duration::ZERO, move || {
                self.load_nodes(true)
            });
        }
        true
    }

    /// The full reload: fetch counters, queue metadata sweeps, refresh the
    /// `max_group` bookkeeping and re-queue itself.
    pub fn load_nodes(self: Arc<Self>, delayed: bool) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            info!("start loading cluster units");

            match self.storage.fetch_stats().await {
                Ok(rows) => {
                    let now = now_secs();
                    let mut state = self.state.write();
                    ingest::update_statistics(&mut state, &rows, now);
                }
                Err(e) => error!("failed to fetch fleet statistics: {e}"),
            }

            if delayed {
                let me = self.clone();
                self.tq.add_task_in(
                    GROUPS_META_UPDATE_TASK_ID,
                    Duration::from_secs(self.reconciler.symm_group_read_gap),
                    move || -> BoxFuture<'static, ()> {
                        Box::pin(async move { me.update_symm_groups().await })
                    },
                );
                let me = self.clone();
                self.tq.add_task_in(
                    COUPLES_META_UPDATE_TASK_ID,
                    Duration::from_secs(self.reconciler.couple_read_gap),
                    move || -> BoxFuture<'static, ()> {
                        Box::pin(async move { me.update_couples_meta().await })
                    },
                );
            } else {
                self.update_symm_groups().await;
                self.update_couples_meta().await;
            }

            if let Err(e) = self.refresh_max_group().await {
                error!("error while refreshing max group id: {e}");
            }

            let period = self.reconciler.nodes_reload_period;
            let me = self.clone();
            self.tq
                .add_task_in(LOAD_NODES_TASK_ID, Duration::from_secs(period), move || {
                    me.load_nodes(true)
                });

            let now = now_secs();
            let previous = {
                let mut timestamps = self.update_timestamps.lock();
                let first = timestamps.0;
                *timestamps = (timestamps.1, now);
                first
            };
            let age = (now - previous).max((period * 3) as f64);
            self.knobs.set_dynamic_too_old_age(age);
        })
    }

    /// The symmetric-groups sweep: one parallel read per known group, then a
    /// discovery-ordered drain that materialises couples as their members'
    /// metadata is learned.
    pub async fn update_symm_groups(&self) {
        let group_ids: Vec<GroupId> = self.state.read().groups.keys().copied().collect();

        let mut handles = Vec::with_capacity(group_ids.len());
        for gid in &group_ids {
            let session = self.storage.scoped(vec![*gid]);
            let gid = *gid;
            debug!("requesting symmetric groups from group {gid}");
            handles.push(tokio::spawn(async move {
                (gid, session.read_data(keys::SYMMETRIC_GROUPS_KEY).await)
            }));
        }

        let mut results: HashMap<GroupId, Result<Vec<u8>, SessionError>> = HashMap::new();
        for handle in handles {
            match handle.await {
                Ok((gid, result)) => {
                    results.insert(gid, result);
                }
                Err(e) => error!("symmetric groups read task failed: {e}"),
            }
        }

        {
            let now = now_secs();
            let mut state = self.state.write();
            for gid in &group_ids {
                if !results.contains_key(gid) {
                    state.clear_group_meta(*gid);
                    state.update_group_status_recursive(*gid, now);
                }
            }
        }

        // Drain preferring groups referenced by already-processed metas so a
        // couple is assembled as soon as all of its members are parsed.
        let mut discovery: VecDeque<GroupId> = VecDeque::new();
        while !results.is_empty() {
            let gid = loop {
                match discovery.pop_front() {
                    Some(candidate) => {
                        if results.contains_key(&candidate) {
                            break candidate;
                        }
                    }
                    None => break *results.keys().next().expect("results is not empty"),
                }
            };
            let result = results.remove(&gid).expect("picked key is present");

            let now = now_secs();
            let mut state = self.state.write();
            match result {
                Ok(blob) => match state.apply_group_metadata(gid, &blob) {
                    Ok(peers) => {
                        for peer in peers {
                            debug!("scheduling update for group {peer}");
                            discovery.push_back(peer);
                        }
                    }
                    Err(e) => {
                        warn!("failed to process symmetric groups of group {gid}: {e}");
                        state.clear_group_meta(gid);
                    }
                },
                Err(e) => {
                    warn!("failed to read symmetric groups from group {gid}: {e}");
                    state.clear_group_meta(gid);
                }
            }
            state.update_group_status_recursive(gid, now);
        }
    }

    /// The couple-meta sweep: one parallel read of the auxiliary meta key
    /// per known couple.
    pub async fn update_couples_meta(&self) {
        let couple_ids: Vec<CoupleId> = self.state.read().couples.keys().cloned().collect();

        let mut handles = Vec::with_capacity(couple_ids.len());
        for id in couple_ids {
            let session = self.meta.clone();
            let key = keys::couple_meta_key(&id);
            debug!("requesting couple {id} metadata");
            handles.push(tokio::spawn(
                async move { (id, session.read_data(&key).await) },
            ));
        }

        for handle in handles {
            let (id, result) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("couple meta read task failed: {e}");
                    continue;
                }
            };

            let now = now_secs();
            let mut state = self.state.write();
            match result.and_then(|blob| {
                CoupleMeta::parse(&blob).map_err(|e| SessionError::Backend(e.to_string()))
            }) {
                Ok(meta) => {
                    info!("updated couple metadata (frozen) for couple {id}");
                    state.set_couple_meta(&id, Some(meta));
                }
                Err(e) => {
                    debug!("failed to read couple {id} metadata: {e}");
                    state.set_couple_meta(&id, None);
                }
            }
            state.update_couple_status(&id, now);
        }
    }

    /// Keeps `mastermind:max_group` at least as large as the highest group
    /// id observed in the fleet.
    async fn refresh_max_group(&self) -> Result<(), MastermindError> {
        let stored: GroupId = match self.meta.read_data(keys::MASTERMIND_MAX_GROUP_KEY).await {
            Ok(blob) => String::from_utf8_lossy(&blob).trim().parse().unwrap_or(0),
            Err(_) => 0,
        };
        let observed = self
            .state
            .read()
            .groups
            .keys()
            .copied()
            .max()
            .unwrap_or(0);
        if observed > stored {
            info!("advancing max group id from {stored} to {observed}");
            self.meta
                .write_data(
                    keys::MASTERMIND_MAX_GROUP_KEY,
                    observed.to_string().as_bytes(),
                )
                .await?;
        }
        Ok(())
    }
}
