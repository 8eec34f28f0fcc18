// src/core/topology/state.rs

//! The shared topology arena and the status derivation that runs over it.
//!
//! Entities reference each other by stable identity (host address,
//! `host:port`, group id, sorted couple id); the four repositories are the
//! sole owners. All mutation is serialised by the single lock the arena
//! lives behind.

use std::collections::BTreeSet;

use tracing::info;

use crate::core::MastermindError;
use crate::core::stats::NodeStat;
use crate::core::topology::couple::{Couple, CoupleId, CoupleMeta};
use crate::core::topology::group::{Group, GroupId, GroupMeta};
use crate::core::topology::host::Host;
use crate::core::topology::node::Node;
use crate::core::topology::repository::Repository;
use crate::core::topology::status::Status;

/// The whole in-memory model of the fleet. Rebuilt from scratch on start;
/// nothing here is persisted.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub hosts: Repository<String, Host>,
    pub nodes: Repository<String, Node>,
    pub groups: Repository<GroupId, Group>,
    pub couples: Repository<CoupleId, Couple>,
}

impl ClusterState {
    pub fn new() -> Self {
        ClusterState {
            hosts: Repository::new(),
            nodes: Repository::new(),
            groups: Repository::new(),
            couples: Repository::new(),
        }
    }

    // --- Aggregated statistics ---

    /// Sum of the group's node snapshots, or `None` while any node still
    /// lacks statistics.
    pub fn group_stat(&self, group_id: GroupId) -> Option<NodeStat> {
        let group = self.groups.get(&group_id)?;
        if group.nodes.is_empty() {
            return None;
        }
        let mut acc: Option<NodeStat> = None;
        for key in &group.nodes {
            let stat = self.nodes.get(key)?.stat?;
            acc = Some(match acc {
                Some(prev) => prev + stat,
                None => stat,
            });
        }
        acc
    }

    /// Bottleneck across the couple's group aggregates, or `None` while any
    /// member group cannot produce one.
    pub fn couple_stat(&self, id: &CoupleId) -> Option<NodeStat> {
        let couple = self.couples.get(id)?;
        let mut acc: Option<NodeStat> = None;
        for gid in &couple.groups {
            let stat = self.group_stat(*gid)?;
            acc = Some(match acc {
                Some(prev) => prev * stat,
                None => stat,
            });
        }
        acc
    }

    // --- Status derivation (bottom-up: node -> group -> couple) ---

    fn set_group_status(&mut self, group_id: GroupId, status: Status, text: String) -> Status {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.status = status;
            group.status_text = text;
        }
        status
    }

    /// Derives a group's status. Evaluated in order; the first matching rule
    /// wins. Refreshes the statuses of the group's nodes along the way.
    pub fn update_group_status(&mut self, group_id: GroupId, now: f64) -> Option<Status> {
        let (node_keys, meta, couple_id) = {
            let group = self.groups.get(&group_id)?;
            (group.nodes.clone(), group.meta.clone(), group.couple.clone())
        };

        if node_keys.is_empty() {
            return Some(self.set_group_status(
                group_id,
                Status::Init,
                format!("Group {group_id} is in INIT state because there are no nodes serving this group"),
            ));
        }

        let meta = match meta {
            Some(meta) if !meta.couple.is_empty() => meta,
            _ => {
                return Some(self.set_group_status(
                    group_id,
                    Status::Init,
                    format!("Group {group_id} is in INIT state because there is no coupling info"),
                ));
            }
        };

        let mut statuses = Vec::with_capacity(node_keys.len());
        for key in &node_keys {
            if let Some(node) = self.nodes.get_mut(key) {
                statuses.push(node.update_status(now));
            }
        }

        if statuses.contains(&Status::Ro) {
            return Some(self.set_group_status(
                group_id,
                Status::Ro,
                format!("Group {group_id} is in Read-Only state because there are read-only nodes"),
            ));
        }

        if !statuses.iter().all(|s| *s == Status::Ok) {
            return Some(self.set_group_status(
                group_id,
                Status::Bad,
                format!("Group {group_id} is in Bad state because some node statuses are not OK"),
            ));
        }

        let Some(couple_id) = couple_id else {
            return Some(self.set_group_status(
                group_id,
                Status::Bad,
                format!("Group {group_id} is in Bad state because its couple was not created"),
            ));
        };

        if !self.check_couple_groups(&couple_id, &meta.couple) {
            return Some(self.set_group_status(
                group_id,
                Status::Bad,
                format!("Group {group_id} is in Bad state because couple check fails"),
            ));
        }

        if meta.namespace.is_empty() {
            return Some(self.set_group_status(
                group_id,
                Status::Bad,
                format!("Group {group_id} is in Bad state because no namespace has been assigned to it"),
            ));
        }

        let couple_ns = self.couple_namespace(&couple_id);
        if couple_ns.as_deref() != Some(meta.namespace.as_str()) {
            return Some(self.set_group_status(
                group_id,
                Status::Bad,
                format!(
                    "Group {group_id} is in Bad state because its namespace doesn't correspond to couple namespace ({})",
                    couple_ns.unwrap_or_default()
                ),
            ));
        }

        Some(self.set_group_status(group_id, Status::Coupled, format!("Group {group_id} is OK")))
    }

    /// Derives a couple's status after refreshing every member group.
    pub fn update_couple_status(&mut self, id: &CoupleId, now: f64) -> Option<Status> {
        let (member_ids, frozen) = {
            let couple = self.couples.get(id)?;
            (couple.groups.clone(), couple.is_frozen())
        };

        let statuses: Vec<Status> = member_ids
            .iter()
            .map(|gid| self.update_group_status(*gid, now).unwrap_or(Status::Init))
            .collect();

        let metas: Vec<Option<GroupMeta>> = member_ids
            .iter()
            .map(|gid| self.groups.get(gid).and_then(|g| g.meta.clone()))
            .collect();

        let status;
        let text;
        if metas.iter().any(|m| *m != metas[0]) {
            status = Status::Bad;
            text = format!("Couple {id} is in Bad state because its groups disagree on metadata");
        } else if statuses.iter().all(|s| *s == Status::Coupled) {
            if frozen {
                status = Status::Frozen;
                text = format!("Couple {id} is frozen");
            } else {
                status = Status::Ok;
                text = format!("Couple {id} is OK");
            }
        } else if statuses.contains(&Status::Init) {
            status = Status::Init;
            text = format!("Couple {id} is in INIT state because some groups are not initialized");
        } else if statuses.contains(&Status::Bad) {
            status = Status::Bad;
            text = format!("Couple {id} is in Bad state because some groups are in Bad state");
        } else if statuses.contains(&Status::Ro) {
            status = Status::Ro;
            text = format!("Couple {id} is in Read-Only state because some groups are read-only");
        } else {
            status = Status::Bad;
            text = format!("Couple {id} is in Bad state");
        }

        if let Some(couple) = self.couples.get_mut(id) {
            couple.status = status;
            couple.status_text = text;
        }
        Some(status)
    }

    /// Refreshes node statuses, then the group, then the enclosing couple
    /// (when there is one, the couple pass re-derives the group as well).
    pub fn update_group_status_recursive(&mut self, group_id: GroupId, now: f64) {
        let (node_keys, couple_id) = match self.groups.get(&group_id) {
            Some(group) => (group.nodes.clone(), group.couple.clone()),
            None => return,
        };
        for key in &node_keys {
            if let Some(node) = self.nodes.get_mut(key) {
                node.update_status(now);
            }
        }
        match couple_id {
            Some(couple_id) => {
                self.update_couple_status(&couple_id, now);
            }
            None => {
                self.update_group_status(group_id, now);
            }
        }
    }

    // --- Cross-group agreement ---

    /// True iff every member's `meta.couple` matches `ids` and `ids` matches
    /// the couple's own member set.
    pub fn check_couple_groups(&self, id: &CoupleId, ids: &[GroupId]) -> bool {
        let Some(couple) = self.couples.get(id) else {
            return false;
        };

        let id_set: BTreeSet<GroupId> = ids.iter().copied().collect();
        for gid in &couple.groups {
            let Some(meta) = self.groups.get(gid).and_then(|g| g.meta.as_ref()) else {
                return false;
            };
            if meta.couple.is_empty() {
                return false;
            }
            let member_view: BTreeSet<GroupId> = meta.couple.iter().copied().collect();
            if member_view != id_set {
                return false;
            }
        }

        let own_set: BTreeSet<GroupId> = couple.groups.iter().copied().collect();
        own_set == id_set
    }

    /// The couple's namespace: the namespace of its first group's meta.
    pub fn couple_namespace(&self, id: &CoupleId) -> Option<String> {
        let couple = self.couples.get(id)?;
        let first = couple.groups.first()?;
        self.groups
            .get(first)
            .and_then(|g| g.meta.as_ref())
            .map(|m| m.namespace.clone())
    }

    // --- Lifecycle ---

    /// Creates (or reuses) the couple over `ids`, materialising placeholder
    /// groups for ids the statistics feed has not shown yet.
    pub fn create_couple(&mut self, ids: &[GroupId]) -> Result<CoupleId, MastermindError> {
        let id = CoupleId::new(ids.iter().copied());
        if id.is_empty() {
            return Err(MastermindError::precondition("empty couple"));
        }
        if self.couples.contains(&id) {
            return Ok(id);
        }

        for gid in id.groups() {
            if !self.groups.contains(gid) {
                info!("group {gid} is not known yet, adding a placeholder for couple {id}");
                self.groups.add(*gid, Group::new(*gid));
            }
        }

        for gid in id.groups() {
            if let Some(existing) = self.groups.get(gid).and_then(|g| g.couple.as_ref()) {
                return Err(MastermindError::Consistency(format!(
                    "Group {gid} is already in couple {existing}"
                )));
            }
        }

        for gid in id.groups() {
            if let Some(group) = self.groups.get_mut(gid) {
                group.couple = Some(id.clone());
            }
        }
        self.couples.add(id.clone(), Couple::new(id.clone()));
        Ok(id)
    }

    /// Unbinds every member group (dropping their metas) and removes the
    /// couple from the repository.
    pub fn destroy_couple(&mut self, id: &CoupleId) {
        let member_ids = match self.couples.get(id) {
            Some(couple) => couple.groups.clone(),
            None => return,
        };
        for gid in member_ids {
            if let Some(group) = self.groups.get_mut(&gid) {
                group.couple = None;
                group.meta = None;
            }
        }
        self.couples.remove(id);
    }

    /// Applies a freshly read symmetric-groups blob to a group. Returns the
    /// peer ids the blob references so the sweep can drain them next.
    pub fn apply_group_metadata(
        &mut self,
        group_id: GroupId,
        blob: &[u8],
    ) -> Result<Vec<GroupId>, MastermindError> {
        let meta = GroupMeta::parse(blob)?;
        let referenced: Vec<GroupId> = meta
            .couple
            .iter()
            .copied()
            .filter(|id| *id != group_id)
            .collect();
        let couple_ids = meta.couple.clone();

        self.groups
            .add_with(group_id, || Group::new(group_id))
            .meta = Some(meta);

        if !couple_ids.is_empty() {
            let id = CoupleId::new(couple_ids);
            if !self.couples.contains(&id) {
                info!("creating couple {id}");
                let members = id.groups().to_vec();
                self.create_couple(&members)?;
            }
        }
        Ok(referenced)
    }

    /// Drops the group's meta after a failed or empty metadata read.
    pub fn clear_group_meta(&mut self, group_id: GroupId) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.clear_meta();
        }
    }

    pub fn set_couple_meta(&mut self, id: &CoupleId, meta: Option<CoupleMeta>) {
        if let Some(couple) = self.couples.get_mut(id) {
            couple.meta = meta;
        }
    }

    /// Removes a node from its group and destroys it, unlinking it from the
    /// host while keeping the destroyed entity addressable.
    pub fn detach_node(
        &mut self,
        group_id: GroupId,
        node_key: &str,
    ) -> Result<(), MastermindError> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| MastermindError::not_found(format!("Group {group_id} is not found")))?;
        if !group.remove_node(node_key) {
            return Err(MastermindError::not_found(format!(
                "Node {node_key} not found in group {group_id}"
            )));
        }

        if let Some(node) = self.nodes.get_mut(&node_key.to_string()) {
            node.destroyed = true;
            node.group = None;
            if let Some(host_addr) = node.host.take() {
                if let Some(host) = self.hosts.get_mut(&host_addr) {
                    host.nodes.retain(|n| n != node_key);
                }
            }
        }
        Ok(())
    }

    /// Ids of the groups that belong to no couple.
    pub fn uncoupled_groups(&self) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|(_, group)| group.couple.is_none())
            .map(|(id, _)| *id)
            .collect()
    }
}
