// src/core/infrastructure.rs

//! In-memory history of group composition changes.
//!
//! Every recorded entry is a snapshot of the group's node set together with
//! the reason it changed. The log is bounded per group; the coordinator
//! rebuilds its model from the fleet on start, so the history is
//! best-effort operational context, not a source of truth.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::core::topology::GroupId;

const MAX_RECORDS_PER_GROUP: usize = 1000;

/// One group composition snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GroupHistoryRecord {
    pub ts: f64,
    /// Node keys serving the group after the change.
    pub nodes: Vec<String>,
    pub reason: String,
}

#[derive(Default)]
pub struct Infrastructure {
    history: Mutex<HashMap<GroupId, Vec<GroupHistoryRecord>>>,
}

impl Infrastructure {
    pub fn new() -> Self {
        Infrastructure::default()
    }

    /// Appends a snapshot of the group's node set.
    pub fn record_node_set(
        &self,
        group_id: GroupId,
        nodes: Vec<String>,
        reason: impl Into<String>,
        ts: f64,
    ) {
        let mut history = self.history.lock();
        let records = history.entry(group_id).or_default();
        records.push(GroupHistoryRecord {
            ts,
            nodes,
            reason: reason.into(),
        });
        if records.len() > MAX_RECORDS_PER_GROUP {
            let excess = records.len() - MAX_RECORDS_PER_GROUP;
            records.drain(..excess);
        }
    }

    pub fn record_detach(
        &self,
        group_id: GroupId,
        node_key: &str,
        remaining: Vec<String>,
        ts: f64,
    ) {
        self.record_node_set(
            group_id,
            remaining,
            format!("node {node_key} detached"),
            ts,
        );
    }

    pub fn get_history(&self, group_id: GroupId) -> Vec<GroupHistoryRecord> {
        self.history
            .lock()
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }
}
