// src/core/topology/node.rs

//! A storage node (`host:port`) and its status machine.

use crate::core::MastermindError;
use crate::core::stats::{NodeStat, RawNodeStat};
use crate::core::topology::group::GroupId;
use crate::core::topology::status::Status;

/// Statistics older than this are considered stalled.
pub const NODE_STALL_AGE_SECS: f64 = 120.0;

/// One storage process serving a group. Owned by the node repository and
/// linked to its host and group by key; a destroyed node is unlinked from
/// both but kept in the repository with its flag set.
#[derive(Debug, Clone)]
pub struct Node {
    /// Repository key, `host:port`. Kept even after destruction so the
    /// repository stays addressable; use [`Node::address`] everywhere else.
    pub key: String,
    pub host: Option<String>,
    pub port: u16,
    pub group: Option<GroupId>,
    pub stat: Option<NodeStat>,
    pub read_only: bool,
    pub destroyed: bool,
    pub status: Status,
    pub status_text: String,
}

impl Node {
    pub fn new(host: &str, port: u16, group: GroupId) -> Self {
        let key = format!("{host}:{port}");
        let status_text = format!("Node {key} is not initialized yet");
        Node {
            key,
            host: Some(host.to_string()),
            port,
            group: Some(group),
            stat: None,
            read_only: false,
            destroyed: false,
            status: Status::Init,
            status_text,
        }
    }

    /// The `host:port` address. Fails for a destroyed node, which no longer
    /// has a meaningful location in the fleet.
    pub fn address(&self) -> Result<&str, MastermindError> {
        if self.destroyed {
            return Err(MastermindError::Internal(
                "node object is destroyed".to_string(),
            ));
        }
        Ok(&self.key)
    }

    /// Replaces the statistics snapshot, deriving rates against the previous
    /// snapshot when one exists.
    pub fn update_statistics(
        &mut self,
        raw: &RawNodeStat,
        now: f64,
    ) -> Result<(), MastermindError> {
        let stat = NodeStat::from_raw(raw, self.stat.as_ref(), now)?;
        self.stat = Some(stat);
        self.read_only = raw.read_only;
        Ok(())
    }

    /// Derives the node status from its current state. Pure in everything
    /// but the passed-in clock.
    pub fn update_status(&mut self, now: f64) -> Status {
        if self.destroyed {
            self.status = Status::Bad;
            self.status_text = format!("Node {} is destroyed", self.key);
        } else if self.stat.is_none() {
            self.status = Status::Init;
            self.status_text = format!("No statistics gathered for node {}", self.key);
        } else if self.stat.as_ref().is_some_and(|s| s.ts < now - NODE_STALL_AGE_SECS) {
            let age = self.stat.as_ref().map(|s| now - s.ts).unwrap_or(0.0);
            self.status = Status::Stalled;
            self.status_text = format!(
                "Statistics for node {} is too old: it was gathered {} seconds ago",
                self.key, age as i64
            );
        } else if self.read_only {
            self.status = Status::Ro;
            self.status_text = format!("Node {} is in Read-Only state", self.key);
        } else {
            self.status = Status::Ok;
            self.status_text = format!("Node {} is OK", self.key);
        }

        self.status
    }
}
