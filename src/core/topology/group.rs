// src/core/topology/group.rs

//! A numbered replica group, its parsed metadata and its status machine.

use serde::{Deserialize, Serialize};

use crate::core::MastermindError;
use crate::core::topology::couple::CoupleId;
use crate::core::topology::status::Status;

pub type GroupId = u32;

/// Namespace assigned to legacy (v1) metadata that predates namespaces.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Parsed symmetric-groups metadata, normalised to the v2 shape.
///
/// Two on-disk encodings are accepted: the legacy v1 array of group ids and
/// the v2 map carrying an explicit namespace and an optional frozen flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMeta {
    pub version: u32,
    /// Ordered list of couple member ids, including this group itself.
    pub couple: Vec<GroupId>,
    pub namespace: String,
    pub frozen: bool,
}

#[derive(Serialize, Deserialize)]
struct GroupMetaWire {
    version: u32,
    couple: Vec<GroupId>,
    namespace: String,
    #[serde(default, skip_serializing_if = "skip_false")]
    frozen: bool,
}

fn skip_false(b: &bool) -> bool {
    !*b
}

impl GroupMeta {
    /// Decodes a v1 or v2 metadata blob.
    pub fn parse(blob: &[u8]) -> Result<GroupMeta, MastermindError> {
        let value = rmpv::decode::read_value(&mut &blob[..])
            .map_err(|e| MastermindError::MetaParse(e.to_string()))?;

        match value {
            rmpv::Value::Array(items) => {
                let mut couple = Vec::with_capacity(items.len());
                for item in items {
                    let id = item.as_u64().ok_or_else(|| {
                        MastermindError::MetaParse(format!(
                            "non-integer group id in v1 meta: {item}"
                        ))
                    })?;
                    couple.push(id as GroupId);
                }
                Ok(GroupMeta {
                    version: 1,
                    couple,
                    namespace: DEFAULT_NAMESPACE.to_string(),
                    frozen: false,
                })
            }
            value @ rmpv::Value::Map(_) => {
                let wire: GroupMetaWire = rmpv::ext::from_value(value)
                    .map_err(|e| MastermindError::MetaParse(e.to_string()))?;
                if wire.version != 2 {
                    return Err(MastermindError::MetaParse(format!(
                        "unsupported meta version {}",
                        wire.version
                    )));
                }
                Ok(GroupMeta {
                    version: wire.version,
                    couple: wire.couple,
                    namespace: wire.namespace,
                    frozen: wire.frozen,
                })
            }
            other => Err(MastermindError::MetaParse(format!(
                "unexpected meta payload: {other}"
            ))),
        }
    }

    /// Builds the v2 metadata every member of a couple should carry.
    pub fn compose(couple: &[GroupId], namespace: &str) -> GroupMeta {
        GroupMeta {
            version: 2,
            couple: couple.to_vec(),
            namespace: namespace.to_string(),
            frozen: false,
        }
    }

    /// Encodes as the v2 map with string keys, the format peers expect.
    pub fn pack(&self) -> Result<Vec<u8>, MastermindError> {
        let wire = GroupMetaWire {
            version: 2,
            couple: self.couple.clone(),
            namespace: self.namespace.clone(),
            frozen: self.frozen,
        };
        Ok(rmp_serde::to_vec_named(&wire)?)
    }
}

/// A numbered dataset replica served by zero or more nodes in one
/// datacenter. Nodes and the enclosing couple are referenced by key.
#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: GroupId,
    /// Keys of the nodes serving this group.
    pub nodes: Vec<String>,
    pub couple: Option<CoupleId>,
    pub meta: Option<GroupMeta>,
    pub status: Status,
    pub status_text: String,
}

impl Group {
    pub fn new(group_id: GroupId) -> Self {
        Group {
            group_id,
            nodes: Vec::new(),
            couple: None,
            meta: None,
            status: Status::Init,
            status_text: format!("Group {group_id} is not initialized yet"),
        }
    }

    pub fn add_node(&mut self, node_key: &str) {
        if !self.nodes.iter().any(|n| n == node_key) {
            self.nodes.push(node_key.to_string());
        }
    }

    pub fn remove_node(&mut self, node_key: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node_key);
        self.nodes.len() != before
    }

    pub fn has_node(&self, node_key: &str) -> bool {
        self.nodes.iter().any(|n| n == node_key)
    }

    /// The "no metadata" transition: clears the parsed meta and moves the
    /// group to `BAD`. Applying it twice is a no-op.
    pub fn clear_meta(&mut self) {
        self.meta = None;
        self.status = Status::Bad;
        self.status_text = format!("Group {} has no coupling metadata", self.group_id);
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.namespace.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v1_array() {
        let blob = rmp_serde::to_vec(&vec![1u32, 2, 3]).unwrap();
        let meta = GroupMeta::parse(&blob).unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.couple, vec![1, 2, 3]);
        assert_eq!(meta.namespace, DEFAULT_NAMESPACE);
        assert!(!meta.frozen);
    }

    #[test]
    fn test_parse_v2_map() {
        let meta = GroupMeta::compose(&[4, 5, 6], "web");
        let blob = meta.pack().unwrap();
        let parsed = GroupMeta::parse(&blob).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let wire = GroupMetaWire {
            version: 3,
            couple: vec![1],
            namespace: "web".to_string(),
            frozen: false,
        };
        let blob = rmp_serde::to_vec_named(&wire).unwrap();
        assert!(GroupMeta::parse(&blob).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(GroupMeta::parse(b"\xc1not msgpack").is_err());
    }

    #[test]
    fn test_pack_round_trip_is_byte_stable() {
        let meta = GroupMeta::compose(&[1, 2], "web");
        let blob = meta.pack().unwrap();
        let reparsed = GroupMeta::parse(&blob).unwrap();
        assert_eq!(reparsed.pack().unwrap(), blob);
    }

    #[test]
    fn test_clear_meta_is_idempotent() {
        let mut group = Group::new(7);
        group.meta = Some(GroupMeta::compose(&[7, 8], "web"));
        group.clear_meta();
        let status = group.status;
        let text = group.status_text.clone();
        group.clear_meta();
        assert_eq!(group.status, status);
        assert_eq!(group.status_text, text);
        assert!(group.meta.is_none());
    }
}
