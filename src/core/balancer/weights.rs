// src/core/balancer/weights.rs

//! Weight tables for write placement.
//!
//! Candidates are the couples currently open for new writes; each gets a
//! deterministic score from its bottleneck statistics, so two coordinators
//! observing the same model produce the same table.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::BalancerConfig;
use crate::core::stats::NodeStat;
use crate::core::topology::{ClusterState, GroupId, Status};

/// Knobs fed by the reconciler at runtime.
pub struct DynamicKnobs {
    /// Statistics older than this many seconds are not trusted for
    /// placement. Kept at no less than three reload periods so a slow
    /// reload cannot starve the balancer.
    dynamic_too_old_age: Mutex<f64>,
}

impl DynamicKnobs {
    pub fn new(initial_too_old_age: f64) -> Self {
        DynamicKnobs {
            dynamic_too_old_age: Mutex::new(initial_too_old_age),
        }
    }

    pub fn dynamic_too_old_age(&self) -> f64 {
        *self.dynamic_too_old_age.lock()
    }

    pub fn set_dynamic_too_old_age(&self, age: f64) {
        *self.dynamic_too_old_age.lock() = age;
    }
}

/// One weighted candidate: `(member ids, weight, bottleneck free space)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightEntry(pub Vec<GroupId>, pub u64, pub u64);

/// `namespace -> couple size -> candidates by descending weight`.
pub type WeightTable = HashMap<String, HashMap<usize, Vec<WeightEntry>>>;

/// True when the couple's bottleneck free space is below the configured
/// absolute or relative threshold.
pub fn couple_is_closed(stat: &NodeStat, config: &BalancerConfig) -> bool {
    stat.free_space < config.min_free_space as f64
        || stat.rel_space < config.min_free_space_relative
}

fn weigh(stat: &NodeStat) -> u64 {
    // Free space scaled by the remaining write throughput headroom.
    let headroom = (stat.max_write_rps - stat.write_rps).max(0.0);
    let ratio = if stat.max_write_rps > 0.0 {
        headroom / stat.max_write_rps
    } else {
        0.0
    };
    (stat.free_space * ratio) as u64
}

/// Builds the full weight table from `OK` couples with fresh statistics,
/// bucketed by `(namespace, size)`.
pub fn build_weights(
    state: &ClusterState,
    config: &BalancerConfig,
    too_old_age: f64,
    now: f64,
) -> WeightTable {
    let mut table = WeightTable::new();

    for (id, couple) in state.couples.iter() {
        if couple.status != Status::Ok {
            continue;
        }
        let Some(stat) = state.couple_stat(id) else {
            continue;
        };
        if stat.ts < now - too_old_age {
            continue;
        }
        if couple_is_closed(&stat, config) {
            continue;
        }
        let Some(namespace) = state.couple_namespace(id) else {
            continue;
        };

        table
            .entry(namespace)
            .or_default()
            .entry(couple.groups.len())
            .or_default()
            .push(WeightEntry(
                couple.groups.clone(),
                weigh(&stat),
                stat.free_space as u64,
            ));
    }

    for sizes in table.values_mut() {
        for entries in sizes.values_mut() {
            entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        }
    }
    table
}
