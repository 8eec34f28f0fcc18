// src/core/balancer/mod.rs

//! Operator handlers: placement weights, couple composition, repair,
//! break, freeze and the read-only info queries.

pub mod weights;

use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use parking_lot::RwLock;

use crate::config::BalancerConfig;
use crate::core::MastermindError;
use crate::core::infrastructure::{GroupHistoryRecord, Infrastructure};
use crate::core::inventory::CachedInventory;
use crate::core::keys;
use crate::core::namespaces::{NamespaceRegistry, NamespaceSettings};
use crate::core::session::{Session, SessionError};
use crate::core::stats::now_secs;
use crate::core::topology::{ClusterState, CoupleId, CoupleMeta, GroupId, GroupMeta, Status};
use weights::{DynamicKnobs, WeightTable, build_weights, couple_is_closed};

/// Summary of one node inside a group info reply.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub addr: String,
    pub status: Status,
}

/// The `get_group_info` reply shape.
#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub status: Status,
    pub status_text: String,
    pub nodes: Vec<NodeInfo>,
    /// Member ids of the enclosing couple, or `None` for an uncoupled group.
    pub couples: Option<Vec<GroupId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// The `get_couple_info` reply shape.
#[derive(Debug, Clone, Serialize)]
pub struct CoupleInfo {
    pub id: String,
    pub couple: Vec<GroupId>,
    pub status: Status,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub frozen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_space: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReply {
    pub message: String,
    pub couple: String,
}

/// The operator-facing side of the coordinator. All handlers read the
/// shared model under its single lock and write persisted metadata through
/// per-operation sessions.
pub struct Balancer {
    state: Arc<RwLock<ClusterState>>,
    storage: Session,
    meta: Session,
    inventory: Arc<CachedInventory>,
    infrastructure: Arc<Infrastructure>,
    namespaces: NamespaceRegistry,
    config: BalancerConfig,
    knobs: Arc<DynamicKnobs>,
}

impl Balancer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<RwLock<ClusterState>>,
        storage: Session,
        meta: Session,
        inventory: Arc<CachedInventory>,
        infrastructure: Arc<Infrastructure>,
        namespaces: NamespaceRegistry,
        config: BalancerConfig,
        knobs: Arc<DynamicKnobs>,
    ) -> Self {
        Balancer {
            state,
            storage,
            meta,
            inventory,
            infrastructure,
            namespaces,
            config,
            knobs,
        }
    }

    // --- Read-only queries ---

    pub fn get_groups(&self) -> Vec<GroupId> {
        self.state.read().groups.keys().copied().collect()
    }

    /// Couples currently good for reads and writes.
    pub fn get_symmetric_groups(&self) -> Vec<Vec<GroupId>> {
        self.couples_with(|status| status == Status::Ok)
    }

    /// Couples needing operator attention. Frozen couples are healthy, just
    /// closed for writes, so they are not listed here.
    pub fn get_bad_groups(&self) -> Vec<Vec<GroupId>> {
        self.couples_with(|status| status != Status::Ok && status != Status::Frozen)
    }

    pub fn get_frozen_groups(&self) -> Vec<Vec<GroupId>> {
        self.couples_with(|status| status == Status::Frozen)
    }

    fn couples_with(&self, predicate: impl Fn(Status) -> bool) -> Vec<Vec<GroupId>> {
        self.state
            .read()
            .couples
            .values()
            .filter(|c| predicate(c.status))
            .map(|c| c.as_tuple())
            .collect()
    }

    /// Healthy couples excluded from new writes by the free-space
    /// thresholds.
    pub fn get_closed_groups(&self) -> Vec<Vec<GroupId>> {
        let state = self.state.read();
        state
            .couples
            .iter()
            .filter(|(id, couple)| {
                couple.status == Status::Ok
                    && state
                        .couple_stat(id)
                        .map(|stat| couple_is_closed(&stat, &self.config))
                        .unwrap_or(false)
            })
            .map(|(_, couple)| couple.as_tuple())
            .collect()
    }

    pub fn get_empty_groups(&self) -> Vec<GroupId> {
        self.state.read().uncoupled_groups()
    }

    pub fn get_group_info(&self, group_id: GroupId) -> Result<GroupInfo, MastermindError> {
        let state = self.state.read();
        let group = state
            .groups
            .get(&group_id)
            .ok_or_else(|| MastermindError::not_found(format!("Group {group_id} is not found")))?;

        let nodes = group
            .nodes
            .iter()
            .filter_map(|key| state.nodes.get(key))
            .map(|node| NodeInfo {
                addr: node.key.clone(),
                status: node.status,
            })
            .collect();

        Ok(GroupInfo {
            group_id,
            status: group.status,
            status_text: group.status_text.clone(),
            nodes,
            couples: group
                .couple
                .as_ref()
                .map(|id| id.groups().to_vec()),
            namespace: group.namespace().map(str::to_string),
        })
    }

    pub fn get_group_history(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<GroupHistoryRecord>, MastermindError> {
        if !self.state.read().groups.contains(&group_id) {
            return Err(MastermindError::not_found(format!(
                "Group {group_id} is not found"
            )));
        }
        Ok(self.infrastructure.get_history(group_id))
    }

    pub fn get_group_weights(&self) -> WeightTable {
        let state = self.state.read();
        build_weights(
            &state,
            &self.config,
            self.knobs.dynamic_too_old_age(),
            now_secs(),
        )
    }

    pub fn get_couple_info(&self, id: &CoupleId) -> Result<CoupleInfo, MastermindError> {
        let state = self.state.read();
        let couple = state
            .couples
            .get(id)
            .ok_or_else(|| MastermindError::not_found(format!("Couple {id} was not found")))?;
        let stat = state.couple_stat(id);

        Ok(CoupleInfo {
            id: id.to_string(),
            couple: couple.as_tuple(),
            status: couple.status,
            status_text: couple.status_text.clone(),
            namespace: state.couple_namespace(id),
            frozen: couple.is_frozen(),
            free_space: stat.map(|s| s.free_space as u64),
            total_space: stat.map(|s| s.total_space as u64),
        })
    }

    /// Resolves a couple for a request that may carry a group id instead of
    /// the full couple identity.
    pub fn couple_of_group(&self, group_id: GroupId) -> Result<CoupleId, MastermindError> {
        let state = self.state.read();
        state
            .groups
            .get(&group_id)
            .and_then(|g| g.couple.clone())
            .ok_or_else(|| {
                MastermindError::not_found(format!("Group {group_id} is not in any couple"))
            })
    }

    /// Groups bucketed by the datacenter of their first node. Groups whose
    /// datacenter cannot be resolved land in `"unknown"`.
    pub fn groups_by_dc(&self) -> HashMap<String, Vec<GroupId>> {
        let state = self.state.read();
        let mut by_dc: HashMap<String, Vec<GroupId>> = HashMap::new();
        for (gid, group) in state.groups.iter() {
            let dc = group
                .nodes
                .first()
                .and_then(|key| state.nodes.get(key))
                .and_then(|node| node.host.as_deref())
                .and_then(|host| self.inventory.get_dc_by_host(host).ok())
                .unwrap_or_else(|| "unknown".to_string());
            by_dc.entry(dc).or_default().push(*gid);
        }
        by_dc
    }

    pub fn couples_by_namespace(&self, namespace: &str) -> Vec<Vec<GroupId>> {
        let state = self.state.read();
        state
            .couples
            .iter()
            .filter(|(id, _)| state.couple_namespace(id).as_deref() == Some(namespace))
            .map(|(_, couple)| couple.as_tuple())
            .collect()
    }

    // --- Couple composition ---

    /// Composes a new couple of `size` uncoupled groups from distinct
    /// datacenters, honoring the mandatory ids, and writes the v2 meta into
    /// every member.
    pub async fn couple_groups(
        &self,
        size: usize,
        mandatory: Vec<GroupId>,
        namespace: &str,
    ) -> Result<Vec<GroupId>, MastermindError> {
        info!(
            "new couple groups request: size {size}, mandatory {mandatory:?}, namespace '{namespace}'"
        );

        let (dc_by_group, mut group_by_dc) = self.uncoupled_pools();
        info!("uncoupled groups by dc: {group_by_dc:?}");

        let mut to_couple = Vec::with_capacity(size);
        for gid in &mandatory {
            let Some(dc) = dc_by_group.get(gid) else {
                return Err(MastermindError::precondition(format!("group {gid} is coupled")));
            };
            if group_by_dc.remove(dc).is_none() {
                return Err(MastermindError::precondition(
                    "groups must be in different dcs",
                ));
            }
            to_couple.push(*gid);
        }

        if size < to_couple.len() {
            return Err(MastermindError::precondition("Too many mandatory groups"));
        }
        let n_to_add = size - to_couple.len();
        if n_to_add > group_by_dc.len() {
            return Err(MastermindError::precondition("Not enough dcs"));
        }

        let mut dcs: Vec<String> = group_by_dc.keys().cloned().collect();
        dcs.sort_unstable();
        dcs.shuffle(&mut rand::thread_rng());
        for dc in dcs.into_iter().take(n_to_add) {
            if let Some(gid) = group_by_dc.get_mut(&dc).and_then(|pool| pool.pop()) {
                to_couple.push(gid);
            }
        }

        let id = self.state.write().create_couple(&to_couple)?;
        let (_, failed) = self.make_symm_group(&id, namespace).await;
        if let Some((_, e)) = failed {
            // Written members are left in place; the operator can clean up
            // with `break_couple --force`.
            return Err(e);
        }
        Ok(to_couple)
    }

    /// Uncoupled groups whose nodes are all `OK`, partitioned by datacenter.
    fn uncoupled_pools(&self) -> (HashMap<GroupId, String>, HashMap<String, Vec<GroupId>>) {
        let state = self.state.read();
        let mut dc_by_group = HashMap::new();
        let mut group_by_dc: HashMap<String, Vec<GroupId>> = HashMap::new();

        for gid in state.uncoupled_groups() {
            let Some(group) = state.groups.get(&gid) else {
                continue;
            };
            if group.nodes.is_empty() {
                continue;
            }
            let all_ok = group
                .nodes
                .iter()
                .all(|key| state.nodes.get(key).is_some_and(|n| n.status == Status::Ok));
            if !all_ok {
                continue;
            }
            let Some(host) = group
                .nodes
                .first()
                .and_then(|key| state.nodes.get(key))
                .and_then(|node| node.host.clone())
            else {
                continue;
            };
            let dc = match self.inventory.get_dc_by_host(&host) {
                Ok(dc) => dc,
                Err(e) => {
                    warn!("skipping group {gid}: {e}");
                    continue;
                }
            };
            dc_by_group.insert(gid, dc.clone());
            group_by_dc.entry(dc).or_default().push(gid);
        }
        (dc_by_group, group_by_dc)
    }

    /// Writes the composed v2 meta into every member group, stopping at the
    /// first failure. Successfully written members keep their new meta.
    async fn make_symm_group(
        &self,
        id: &CoupleId,
        namespace: &str,
    ) -> (Vec<GroupId>, Option<(GroupId, MastermindError)>) {
        info!("writing couple info for {id}, namespace '{namespace}'");
        let meta = GroupMeta::compose(id.groups(), namespace);
        let packed = match meta.pack() {
            Ok(packed) => packed,
            Err(e) => return (Vec::new(), Some((id.groups()[0], e))),
        };

        let mut good = Vec::new();
        for gid in id.groups() {
            let session = self.storage.scoped(vec![*gid]);
            match session.write_data(keys::SYMMETRIC_GROUPS_KEY, &packed).await {
                Ok(()) => good.push(*gid),
                Err(e) => {
                    error!("failed to write symmetric groups meta to group {gid}: {e}");
                    return (good, Some((*gid, e.into())));
                }
            }
        }

        // Targeted reconciliation: fold the written meta into the model now
        // instead of waiting for the next sweep.
        let now = now_secs();
        let mut state = self.state.write();
        for gid in id.groups() {
            if let Some(group) = state.groups.get_mut(gid) {
                group.meta = Some(meta.clone());
            }
        }
        state.update_couple_status(id, now);
        (good, None)
    }

    /// Rewrites consistent metadata into every member of the single broken
    /// couple the group belongs to.
    pub async fn repair_groups(
        &self,
        group_id: GroupId,
        force_namespace: Option<String>,
    ) -> Result<RepairReply, MastermindError> {
        info!("new repair groups request: group {group_id}");

        let (couple_id, peer_metas) = {
            let state = self.state.read();
            if !state.groups.contains(&group_id) {
                return Err(MastermindError::not_found(format!(
                    "Group {group_id} is not found"
                )));
            }

            let containing: Vec<(CoupleId, Status)> = state
                .couples
                .iter()
                .filter(|(id, _)| id.contains(group_id))
                .map(|(id, couple)| (id.clone(), couple.status))
                .collect();

            if let Some((id, _)) = containing.iter().find(|(_, status)| *status == Status::Ok) {
                return Err(MastermindError::precondition(format!(
                    "cannot repair, group {group_id} is in couple {id}"
                )));
            }
            if containing.is_empty() {
                return Err(MastermindError::precondition(format!(
                    "cannot repair, group {group_id} is not a member of any couple"
                )));
            }
            if containing.len() > 1 {
                let list = containing
                    .iter()
                    .map(|(id, _)| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(MastermindError::precondition(format!(
                    "cannot repair, group {group_id} is a member of several couples: {list}"
                )));
            }

            let (id, _) = containing.into_iter().next().expect("one couple");
            let peer_metas: Vec<(GroupId, Option<GroupMeta>)> = id
                .groups()
                .iter()
                .filter(|gid| **gid != group_id)
                .map(|gid| (*gid, state.groups.get(gid).and_then(|g| g.meta.clone())))
                .collect();
            (id, peer_metas)
        };

        let namespace = if peer_metas.iter().all(|(_, meta)| meta.is_none()) {
            match force_namespace {
                Some(namespace) => namespace,
                None => {
                    let peer = peer_metas
                        .first()
                        .map(|(gid, _)| *gid)
                        .unwrap_or(group_id);
                    return Err(MastermindError::precondition(format!(
                        "group {peer} (coupled with group {group_id}) has no metadata"
                    )));
                }
            }
        } else {
            for (gid, meta) in &peer_metas {
                if meta.is_none() {
                    return Err(MastermindError::precondition(format!(
                        "group {gid} (coupled with group {group_id}) has no metadata"
                    )));
                }
            }
            let namespaces: Vec<&str> = peer_metas
                .iter()
                .filter_map(|(_, meta)| meta.as_ref())
                .map(|meta| meta.namespace.as_str())
                .collect();
            if !namespaces.iter().all(|ns| *ns == namespaces[0]) {
                return Err(MastermindError::precondition(format!(
                    "namespaces of groups coupled with group {group_id} are not the same"
                )));
            }
            namespaces[0].to_string()
        };

        let (_, failed) = self.make_symm_group(&couple_id, &namespace).await;
        if let Some((_, e)) = failed {
            return Err(e);
        }
        Ok(RepairReply {
            message: "Successfully repaired couple".to_string(),
            couple: couple_id.to_string(),
        })
    }

    /// Deletes the symmetric-groups key from every member and destroys the
    /// couple. Requires the literal confirmation string unless forced.
    pub async fn break_couple(
        &self,
        ids: Vec<GroupId>,
        confirmation: &str,
        force: bool,
    ) -> Result<bool, MastermindError> {
        let id = CoupleId::new(ids);
        let status = {
            let state = self.state.read();
            state
                .couples
                .get(&id)
                .ok_or_else(|| {
                    MastermindError::not_found(format!("Couple {id} was not found"))
                })?
                .status
        };
        info!("breaking couple {id} (status {status}), confirmation \"{confirmation}\"");

        if !force {
            let kind = if status == Status::Ok { "good" } else { "bad" };
            let expected = format!("Yes, I want to break {kind} couple {id}");
            let given = confirmation
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .unwrap_or(confirmation);
            if given != expected {
                return Err(MastermindError::precondition(
                    "Incorrect confirmation string",
                ));
            }
        }

        self.kill_symm_group(&id).await?;
        self.state.write().destroy_couple(&id);
        Ok(true)
    }

    /// Removes the symmetric-groups key from every member group; a missing
    /// key is not an error.
    async fn kill_symm_group(&self, id: &CoupleId) -> Result<(), MastermindError> {
        info!("killing symm groups {id}");
        for gid in id.groups() {
            let session = self.storage.scoped(vec![*gid]);
            match session.remove(keys::SYMMETRIC_GROUPS_KEY).await {
                Ok(()) | Err(SessionError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // --- Freeze lifecycle ---

    pub async fn freeze_couple(&self, id: &CoupleId) -> Result<bool, MastermindError> {
        self.set_frozen(id, true).await
    }

    pub async fn unfreeze_couple(&self, id: &CoupleId) -> Result<bool, MastermindError> {
        self.set_frozen(id, false).await
    }

    async fn set_frozen(&self, id: &CoupleId, frozen: bool) -> Result<bool, MastermindError> {
        let currently_frozen = {
            let state = self.state.read();
            state
                .couples
                .get(id)
                .ok_or_else(|| {
                    MastermindError::not_found(format!("Couple {id} was not found"))
                })?
                .is_frozen()
        };

        if frozen && currently_frozen {
            return Err(MastermindError::precondition(format!(
                "Couple {id} is already frozen"
            )));
        }
        if !frozen && !currently_frozen {
            return Err(MastermindError::precondition(format!(
                "Couple {id} is not frozen"
            )));
        }

        let meta = CoupleMeta { frozen };
        self.meta
            .write_data(&keys::couple_meta_key(id), &meta.pack()?)
            .await?;

        let now = now_secs();
        let mut state = self.state.write();
        state.set_couple_meta(id, Some(meta));
        state.update_couple_status(id, now);
        info!("couple {id} frozen flag set to {frozen}");
        Ok(true)
    }

    // --- Namespaces ---

    pub async fn get_namespaces(&self) -> Result<Vec<String>, MastermindError> {
        self.namespaces.list().await
    }

    pub async fn get_namespace_settings(
        &self,
        namespace: &str,
    ) -> Result<NamespaceSettings, MastermindError> {
        self.namespaces.get(namespace).await
    }

    pub async fn get_namespaces_settings(
        &self,
    ) -> Result<Vec<NamespaceSettings>, MastermindError> {
        self.namespaces.get_all().await
    }

    pub async fn namespace_setup(
        &self,
        settings: NamespaceSettings,
    ) -> Result<bool, MastermindError> {
        settings.validate()?;

        if let Some(static_couple) = &settings.static_couple {
            let id = CoupleId::new(static_couple.iter().copied());
            let state = self.state.read();
            let couple = state.couples.get(&id).ok_or_else(|| {
                MastermindError::precondition(format!(
                    "static-couple {id} is not an existing couple"
                ))
            })?;
            if couple.groups.len() != settings.groups_count as usize {
                return Err(MastermindError::precondition(format!(
                    "static-couple {id} does not contain groups-count ({}) groups",
                    settings.groups_count
                )));
            }
        }

        self.namespaces.setup(&settings).await?;
        Ok(true)
    }

    // --- Group number allocation ---

    /// Allocates `count` fresh group numbers by advancing the persisted
    /// maximum. The coordinator is the single writer of this key.
    pub async fn get_next_group_number(
        &self,
        count: i64,
    ) -> Result<Vec<GroupId>, MastermindError> {
        if !(0..=100).contains(&count) {
            return Err(MastermindError::precondition("Incorrect groups count"));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let max_group: GroupId = match self.meta.read_data(keys::MASTERMIND_MAX_GROUP_KEY).await {
            Ok(blob) => String::from_utf8_lossy(&blob).trim().parse().unwrap_or(0),
            Err(_) => 0,
        };
        let new_max = max_group + count as GroupId;
        self.meta
            .write_data(keys::MASTERMIND_MAX_GROUP_KEY, new_max.to_string().as_bytes())
            .await?;

        Ok((max_group + 1..=new_max).collect())
    }

    // --- Node detachment ---

    pub fn group_detach_node(
        &self,
        group_id: GroupId,
        node_key: &str,
    ) -> Result<bool, MastermindError> {
        info!("detaching node {node_key} from group {group_id}");
        let now = now_secs();
        let remaining = {
            let mut state = self.state.write();
            state.detach_node(group_id, node_key)?;
            state.update_group_status_recursive(group_id, now);
            state
                .groups
                .get(&group_id)
                .map(|g| g.nodes.clone())
                .unwrap_or_default()
        };
        self.infrastructure
            .record_detach(group_id, node_key, remaining, now);
        Ok(true)
    }
}
