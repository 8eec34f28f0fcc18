// src/core/topology/ingest.rs

//! Consumes raw counter rows and materialises the topology they describe.

use tracing::{debug, error, info};

use crate::core::MastermindError;
use crate::core::stats::RawNodeStat;
use crate::core::topology::group::Group;
use crate::core::topology::host::Host;
use crate::core::topology::node::Node;
use crate::core::topology::state::ClusterState;

/// Feeds one batch of counter rows into the model. Each row creates its
/// host, group and node when they are missing, refreshes the node snapshot
/// and re-derives the group status. A failing row is dropped; it never
/// aborts the batch.
pub fn update_statistics(state: &mut ClusterState, rows: &[RawNodeStat], now: f64) {
    for row in rows {
        debug!("stats: group {} node {}", row.group_id, row.addr);
        if let Err(e) = ingest_row(state, row, now) {
            error!(
                "unable to process statistics for node {} group {}: {}",
                row.addr, row.group_id, e
            );
        }
    }
}

fn ingest_row(
    state: &mut ClusterState,
    row: &RawNodeStat,
    now: f64,
) -> Result<(), MastermindError> {
    if !state.nodes.contains(&row.addr) {
        let (host_addr, port) = split_addr(&row.addr)?;

        if !state.hosts.contains(&host_addr) {
            debug!("adding host {host_addr}");
            state.hosts.add(host_addr.clone(), Host::new(&host_addr));
        }
        if !state.groups.contains(&row.group_id) {
            debug!("adding group {}", row.group_id);
            state.groups.add(row.group_id, Group::new(row.group_id));
        }

        let node = Node::new(&host_addr, port, row.group_id);
        let key = node.key.clone();
        debug!("adding node {} -> {}", row.group_id, key);
        if let Some(host) = state.hosts.get_mut(&host_addr) {
            host.nodes.push(key.clone());
        }
        if let Some(group) = state.groups.get_mut(&row.group_id) {
            group.add_node(&key);
        }
        state.nodes.add(key, node);
    }

    {
        let node = state
            .nodes
            .get_mut(&row.addr)
            .ok_or_else(|| MastermindError::Internal(format!("node {} vanished", row.addr)))?;
        if node.group != Some(row.group_id) {
            return Err(MastermindError::Consistency(format!(
                "node group is {:?}, group from stat is {}",
                node.group, row.group_id
            )));
        }
        info!("updating statistics for node {}", row.addr);
        node.update_statistics(row, now)?;
    }

    state.update_group_status(row.group_id, now);
    Ok(())
}

fn split_addr(addr: &str) -> Result<(String, u16), MastermindError> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        MastermindError::Internal(format!("malformed node address '{addr}'"))
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| MastermindError::Internal(format!("malformed node port in '{addr}'")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::Status;
    use std::collections::HashMap;

    fn raw_row(addr: &str, group_id: u32) -> RawNodeStat {
        let mut counters = HashMap::new();
        counters.insert("DNET_CNTR_BLOCKS".to_string(), vec![100]);
        counters.insert("DNET_CNTR_BSIZE".to_string(), vec![4096]);
        counters.insert("DNET_CNTR_BAVAIL".to_string(), vec![50]);
        counters.insert("DNET_CNTR_LA1".to_string(), vec![500]);
        let mut cmds = HashMap::new();
        cmds.insert("READ".to_string(), vec![0]);
        cmds.insert("WRITE".to_string(), vec![0]);
        RawNodeStat {
            addr: addr.to_string(),
            group_id,
            counters,
            storage_commands: cmds.clone(),
            proxy_commands: cmds,
            read_only: false,
        }
    }

    #[test]
    fn test_bootstrap_from_single_row() {
        let mut state = ClusterState::new();
        update_statistics(&mut state, &[raw_row("10.0.0.1:1025", 7)], 1000.0);

        assert_eq!(state.hosts.len(), 1);
        assert_eq!(state.groups.len(), 1);
        assert_eq!(state.nodes.len(), 1);

        let node = state.nodes.get(&"10.0.0.1:1025".to_string()).unwrap();
        assert!(node.stat.is_some());
        // Statuses are derived by the reconciliation sweeps, not by bare
        // ingestion: the node has not been judged yet.
        assert_eq!(node.status, Status::Init);
        // The group has a node and a stat but no coupling info yet.
        assert_eq!(state.groups.get(&7).unwrap().status, Status::Init);
    }

    #[test]
    fn test_row_is_idempotent_for_status() {
        let mut state = ClusterState::new();
        let row = raw_row("10.0.0.1:1025", 7);
        update_statistics(&mut state, &[row.clone()], 1000.0);
        let status = state.groups.get(&7).unwrap().status;
        update_statistics(&mut state, &[row], 1001.0);
        assert_eq!(state.groups.get(&7).unwrap().status, status);
        assert_eq!(state.nodes.len(), 1);
    }

    #[test]
    fn test_group_id_mismatch_drops_row() {
        let mut state = ClusterState::new();
        update_statistics(&mut state, &[raw_row("10.0.0.1:1025", 7)], 1000.0);
        let before = state.nodes.get(&"10.0.0.1:1025".to_string()).unwrap().stat;

        // Same node claims a different group: the row must be dropped.
        update_statistics(&mut state, &[raw_row("10.0.0.1:1025", 8)], 1001.0);
        let after = state.nodes.get(&"10.0.0.1:1025".to_string()).unwrap().stat;
        assert_eq!(before.unwrap().ts, after.unwrap().ts);
        assert!(!state.groups.contains(&8));
    }
}
