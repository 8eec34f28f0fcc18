// src/core/inventory.rs

//! Resolves host addresses to datacenters (failure domains).
//!
//! The real resolver is deployment-specific (reverse DNS plus an external
//! directory) and may block, so lookups go through a per-host cache.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::MastermindError;

/// A datacenter directory. Implementations may block; callers go through
/// [`CachedInventory`], which consults each host at most once.
pub trait Inventory: Send + Sync {
    fn get_dc_by_host(&self, addr: &str) -> Result<String, MastermindError>;
}

/// Inventory backed by a static address table from the configuration, with
/// an optional fallback datacenter for unlisted hosts.
pub struct StaticInventory {
    dc_by_host: HashMap<String, String>,
    default_dc: Option<String>,
}

impl StaticInventory {
    pub fn new(dc_by_host: HashMap<String, String>, default_dc: Option<String>) -> Self {
        StaticInventory {
            dc_by_host,
            default_dc,
        }
    }
}

impl Inventory for StaticInventory {
    fn get_dc_by_host(&self, addr: &str) -> Result<String, MastermindError> {
        if let Some(dc) = self.dc_by_host.get(addr) {
            return Ok(dc.clone());
        }
        self.default_dc.clone().ok_or_else(|| {
            MastermindError::not_found(format!("no datacenter known for host {addr}"))
        })
    }
}

/// Caching front for an [`Inventory`]; one successful resolution per host is
/// kept for the life of the process.
pub struct CachedInventory {
    inner: Arc<dyn Inventory>,
    cache: DashMap<String, String>,
}

impl CachedInventory {
    pub fn new(inner: Arc<dyn Inventory>) -> Self {
        CachedInventory {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn get_dc_by_host(&self, addr: &str) -> Result<String, MastermindError> {
        if let Some(dc) = self.cache.get(addr) {
            return Ok(dc.clone());
        }
        let dc = self.inner.get_dc_by_host(addr)?;
        debug!("resolved host {addr} to dc {dc}");
        self.cache.insert(addr.to_string(), dc.clone());
        Ok(dc)
    }
}
