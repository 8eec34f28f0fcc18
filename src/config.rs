// src/config.rs

//! Manages coordinator configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

use crate::core::topology::GroupId;

/// Addresses of the storage fleet and the per-operation read/write timeout.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Seed nodes of the fleet, `host:port`.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Timeout for a single storage operation, seconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            wait_timeout: default_wait_timeout(),
        }
    }
}

fn default_wait_timeout() -> u64 {
    5
}

/// The metadata store: the same protocol as the fleet, scoped to dedicated
/// groups.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Groups holding coordinator metadata (couple meta, max_group,
    /// namespace settings).
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

/// Periods of the reconciliation loop, all in seconds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReconcilerConfig {
    #[serde(default = "default_nodes_reload_period")]
    pub nodes_reload_period: u64,
    #[serde(default = "default_read_gap")]
    pub symm_group_read_gap: u64,
    #[serde(default = "default_read_gap")]
    pub couple_read_gap: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            nodes_reload_period: default_nodes_reload_period(),
            symm_group_read_gap: default_read_gap(),
            couple_read_gap: default_read_gap(),
        }
    }
}

fn default_nodes_reload_period() -> u64 {
    60
}
fn default_read_gap() -> u64 {
    1
}

/// Thresholds the balancer uses to close couples for new writes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BalancerConfig {
    /// A couple is closed when its bottleneck free space drops below this
    /// many bytes.
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
    /// ... or below this fraction of total space, in `[0, 1]`.
    #[serde(default = "default_min_free_space_relative")]
    pub min_free_space_relative: f64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            min_free_space: default_min_free_space(),
            min_free_space_relative: default_min_free_space_relative(),
        }
    }
}

fn default_min_free_space() -> u64 {
    256 * 1024 * 1024 // 256 MB
}
fn default_min_free_space_relative() -> f64 {
    0.15
}

/// The static host-to-datacenter table used when no external inventory
/// service is wired in.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InventoryConfig {
    #[serde(default)]
    pub dc_by_host: HashMap<String, String>,
    /// Datacenter assumed for hosts missing from the table. Unset means an
    /// unknown host is an error.
    #[serde(default)]
    pub default_dc: Option<String>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    metadata: MetadataConfig,
    #[serde(default)]
    reconciler: ReconcilerConfig,
    #[serde(default)]
    balancer: BalancerConfig,
    #[serde(default)]
    inventory: InventoryConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The final, validated coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    pub reconciler: ReconcilerConfig,
    pub balancer: BalancerConfig,
    pub inventory: InventoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            reconciler: ReconcilerConfig::default(),
            balancer: BalancerConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            log_level: raw.log_level,
            storage: raw.storage,
            metadata: raw.metadata,
            reconciler: raw.reconciler,
            balancer: raw.balancer,
            inventory: raw.inventory,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.storage.wait_timeout == 0 {
            return Err(anyhow!("storage.wait_timeout cannot be 0"));
        }
        if self.reconciler.nodes_reload_period == 0 {
            return Err(anyhow!("reconciler.nodes_reload_period cannot be 0"));
        }
        if !(0.0..=1.0).contains(&self.balancer.min_free_space_relative) {
            return Err(anyhow!(
                "balancer.min_free_space_relative must be within [0, 1]"
            ));
        }
        if self.metadata.groups.is_empty() {
            return Err(anyhow!("metadata.groups cannot be empty"));
        }
        Ok(())
    }
}
