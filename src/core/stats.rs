// src/core/stats.rs

//! Per-node counter rows and the derived `NodeStat` snapshot.
//!
//! `NodeStat` supports two combining operations: `+` aggregates the nodes of
//! one group (spaces and rps add up), while `*` computes the bottleneck
//! across the groups of a couple (spaces and max rps take the minimum).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Add, Mul};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::MastermindError;
use crate::core::topology::GroupId;

/// Current wall-clock time in seconds since the epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A raw counter row as delivered by the fleet's stat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNodeStat {
    /// Node address, `ip:port`.
    pub addr: String,
    pub group_id: GroupId,
    /// `DNET_CNTR_*` counters; each value is a vector whose first element is
    /// the current reading.
    pub counters: HashMap<String, Vec<u64>>,
    pub storage_commands: HashMap<String, Vec<u64>>,
    pub proxy_commands: HashMap<String, Vec<u64>>,
    /// Whether the node reported itself read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl RawNodeStat {
    fn counter(&self, name: &str) -> Result<u64, MastermindError> {
        self.counters
            .get(name)
            .and_then(|v| v.first())
            .copied()
            .ok_or_else(|| MastermindError::Internal(format!("missing counter {name}")))
    }

    fn command(
        table: &HashMap<String, Vec<u64>>,
        name: &str,
    ) -> Result<u64, MastermindError> {
        table
            .get(name)
            .and_then(|v| v.first())
            .copied()
            .ok_or_else(|| MastermindError::Internal(format!("missing command counter {name}")))
    }
}

/// A derived statistics snapshot for one node (or an aggregate of them).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeStat {
    /// Wall-clock time the snapshot was taken, seconds.
    pub ts: f64,
    /// Absolute READ/WRITE command counters, kept as the baseline for the
    /// next rps derivation.
    pub last_read: u64,
    pub last_write: u64,
    pub total_space: f64,
    pub free_space: f64,
    /// Free fraction of the disk, in `[0, 1]`.
    pub rel_space: f64,
    pub load_average: f64,
    pub read_rps: f64,
    pub write_rps: f64,
    pub max_read_rps: f64,
    pub max_write_rps: f64,
}

/// First estimate for the performance of a node with no rps history.
/// Typical commodity SATA disk performance is about 100 IOPS.
const INITIAL_MAX_RPS: f64 = 100.0;

impl NodeStat {
    /// Builds a snapshot from a raw counter row, deriving rps against the
    /// previous snapshot when one exists.
    pub fn from_raw(
        raw: &RawNodeStat,
        prev: Option<&NodeStat>,
        now: f64,
    ) -> Result<NodeStat, MastermindError> {
        let blocks = raw.counter("DNET_CNTR_BLOCKS")? as f64;
        let bsize = raw.counter("DNET_CNTR_BSIZE")? as f64;
        let bavail = raw.counter("DNET_CNTR_BAVAIL")? as f64;
        // Disk usage is preferred over load average when the node reports it.
        let la_raw = raw
            .counter("DNET_CNTR_DU1")
            .or_else(|_| raw.counter("DNET_CNTR_LA1"))?;

        let last_read = RawNodeStat::command(&raw.storage_commands, "READ")?
            + RawNodeStat::command(&raw.proxy_commands, "READ")?;
        let last_write = RawNodeStat::command(&raw.storage_commands, "WRITE")?
            + RawNodeStat::command(&raw.proxy_commands, "WRITE")?;

        let load_average = la_raw as f64 / 100.0;

        let mut stat = NodeStat {
            ts: now,
            last_read,
            last_write,
            total_space: blocks * bsize,
            free_space: bavail * bsize,
            rel_space: if blocks > 0.0 { bavail / blocks } else { 0.0 },
            load_average,
            read_rps: 0.0,
            write_rps: 0.0,
            max_read_rps: INITIAL_MAX_RPS,
            max_write_rps: INITIAL_MAX_RPS,
        };

        if let Some(prev) = prev {
            let dt = now - prev.ts;
            if dt > 0.0 {
                stat.read_rps = last_read.saturating_sub(prev.last_read) as f64 / dt;
                stat.write_rps = last_write.saturating_sub(prev.last_write) as f64 / dt;
                let scale = |rps: f64| {
                    if load_average > 0.0 {
                        (rps / load_average).max(INITIAL_MAX_RPS)
                    } else {
                        INITIAL_MAX_RPS
                    }
                };
                stat.max_read_rps = scale(stat.read_rps);
                stat.max_write_rps = scale(stat.write_rps);
            }
        }

        Ok(stat)
    }
}

impl Add for NodeStat {
    type Output = NodeStat;

    /// Aggregates two node snapshots of the same group: spaces and rps add,
    /// timestamps and relative space take the pessimistic minimum.
    fn add(self, other: NodeStat) -> NodeStat {
        NodeStat {
            ts: self.ts.min(other.ts),
            last_read: self.last_read + other.last_read,
            last_write: self.last_write + other.last_write,
            total_space: self.total_space + other.total_space,
            free_space: self.free_space + other.free_space,
            rel_space: self.rel_space.min(other.rel_space),
            load_average: self.load_average.max(other.load_average),
            read_rps: self.read_rps + other.read_rps,
            write_rps: self.write_rps + other.write_rps,
            max_read_rps: self.max_read_rps + other.max_read_rps,
            max_write_rps: self.max_write_rps + other.max_write_rps,
        }
    }
}

impl Mul for NodeStat {
    type Output = NodeStat;

    /// Bottlenecks two group aggregates of the same couple: every capacity
    /// takes the minimum, every pressure indicator the maximum.
    fn mul(self, other: NodeStat) -> NodeStat {
        NodeStat {
            ts: self.ts.min(other.ts),
            last_read: self.last_read.min(other.last_read),
            last_write: self.last_write.min(other.last_write),
            total_space: self.total_space.min(other.total_space),
            free_space: self.free_space.min(other.free_space),
            rel_space: self.rel_space.min(other.rel_space),
            load_average: self.load_average.max(other.load_average),
            read_rps: self.read_rps.max(other.read_rps),
            write_rps: self.write_rps.max(other.write_rps),
            max_read_rps: self.max_read_rps.min(other.max_read_rps),
            max_write_rps: self.max_write_rps.min(other.max_write_rps),
        }
    }
}
