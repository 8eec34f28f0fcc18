// src/core/topology/host.rs

//! A physical host, identified by its network address.

/// One machine of the fleet. Nodes hosted on it are referenced by their
/// `host:port` keys; the datacenter is resolved on demand through the
/// inventory adapter and cached there, not here.
#[derive(Debug, Clone)]
pub struct Host {
    pub addr: String,
    /// Keys of the nodes running on this host, in discovery order.
    pub nodes: Vec<String>,
}

impl Host {
    pub fn new(addr: impl Into<String>) -> Self {
        Host {
            addr: addr.into(),
            nodes: Vec::new(),
        }
    }
}
