// src/core/keys.rs

//! Well-known persisted keys on the storage fleet and the metadata store.
//!
//! The key strings are wire format: changing any of them orphans the data
//! already written by older coordinators.

use crate::core::topology::CoupleId;

/// Per-group symmetric-groups pointer (v1 or v2 group meta, MessagePack).
/// The embedded NUL byte is part of the key.
pub const SYMMETRIC_GROUPS_KEY: &str = "metabalancer\0symmetric_groups";

/// Monotonic group-number allocator, plain ASCII decimal.
pub const MASTERMIND_MAX_GROUP_KEY: &str = "mastermind:max_group";

/// Namespace settings secondary index (list of known namespace names).
pub const MM_NAMESPACE_SETTINGS_IDX: &str = "mastermind:ns_settings_idx";

/// Per-couple auxiliary metadata key (`{frozen: bool}`, MessagePack).
pub fn couple_meta_key(couple: &CoupleId) -> String {
    format!("mastermind:couple_meta:{couple}")
}

/// Per-namespace settings blob key.
pub fn namespace_settings_key(namespace: &str) -> String {
    format!("mastermind:ns_settings:{namespace}")
}
