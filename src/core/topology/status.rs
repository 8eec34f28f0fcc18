// src/core/topology/status.rs

//! The status alphabet shared by nodes, groups and couples.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health state of a topology entity. Derived bottom-up (node, then group,
/// then couple) by the pure transition functions in
/// [`super::state::ClusterState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Entity is known but not yet fully materialised (no stats, no meta).
    Init,
    /// Healthy. For couples this means "open for new writes".
    Ok,
    /// A group whose nodes are healthy and whose couple agrees with it.
    Coupled,
    /// Broken or inconsistent; excluded from writes until repaired.
    Bad,
    /// Readable but not writable.
    Ro,
    /// Administratively closed for new writes while remaining readable.
    Frozen,
    /// Statistics are too old to trust.
    Stalled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Init => "INIT",
            Status::Ok => "OK",
            Status::Coupled => "COUPLED",
            Status::Bad => "BAD",
            Status::Ro => "RO",
            Status::Frozen => "FROZEN",
            Status::Stalled => "STALLED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
