// src/core/topology/couple.rs

//! A couple: several groups in distinct datacenters replicating one dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::MastermindError;
use crate::core::topology::group::GroupId;
use crate::core::topology::status::Status;

/// The identity of a couple: its member ids, sorted and deduplicated.
/// Renders as the colon-joined form (`12:34:56`) used in keys and messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoupleId(Vec<GroupId>);

impl CoupleId {
    pub fn new(ids: impl IntoIterator<Item = GroupId>) -> Self {
        let mut ids: Vec<GroupId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        CoupleId(ids)
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.0
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CoupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in &self.0 {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{id}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for CoupleId {
    type Err = MastermindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids = s
            .split(':')
            .map(|part| {
                part.trim().parse::<GroupId>().map_err(|_| {
                    MastermindError::precondition(format!("invalid couple id '{s}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(MastermindError::precondition("empty couple id"));
        }
        Ok(CoupleId::new(ids))
    }
}

/// Auxiliary per-couple metadata, stored under its own key independently of
/// the per-group couple membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoupleMeta {
    #[serde(default)]
    pub frozen: bool,
}

impl CoupleMeta {
    pub fn parse(blob: &[u8]) -> Result<CoupleMeta, MastermindError> {
        rmp_serde::from_slice(blob).map_err(|e| MastermindError::MetaParse(e.to_string()))
    }

    pub fn pack(&self) -> Result<Vec<u8>, MastermindError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}

/// A replication unit spanning several groups. The member list is sorted by
/// group id and doubles as the repository key via [`CoupleId`].
#[derive(Debug, Clone)]
pub struct Couple {
    pub id: CoupleId,
    pub groups: Vec<GroupId>,
    pub meta: Option<CoupleMeta>,
    pub status: Status,
    pub status_text: String,
}

impl Couple {
    pub fn new(id: CoupleId) -> Self {
        let groups = id.groups().to_vec();
        let status_text = format!("Couple {id} is not initialized yet");
        Couple {
            id,
            groups,
            meta: None,
            status: Status::Init,
            status_text,
        }
    }

    pub fn as_tuple(&self) -> Vec<GroupId> {
        self.groups.clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.meta.map(|m| m.frozen).unwrap_or(false)
    }
}
