// src/core/namespaces.rs

//! Persisted per-namespace settings, kept on the metadata store behind a
//! secondary index: one key lists the known namespace names, one key per
//! namespace holds the full settings blob.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::MastermindError;
use crate::core::keys;
use crate::core::session::{Session, SessionError};
use crate::core::topology::GroupId;

static NAMESPACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*[A-Za-z0-9]$").expect("valid regex"));

/// How many copies of a write must succeed before it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessCopies {
    Any,
    Quorum,
    All,
}

/// The settings blob for one namespace, stored whole (the `namespace` field
/// included) so a fetched entry is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    pub namespace: String,
    #[serde(rename = "groups-count")]
    pub groups_count: u32,
    #[serde(rename = "success-copies-num")]
    pub success_copies_num: SuccessCopies,
    #[serde(
        rename = "static-couple",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub static_couple: Option<Vec<GroupId>>,
}

impl NamespaceSettings {
    /// Shape validation. Whether a `static-couple` refers to a real couple
    /// is checked against the live model by the handler.
    pub fn validate(&self) -> Result<(), MastermindError> {
        if !NAMESPACE_NAME_RE.is_match(&self.namespace) {
            return Err(MastermindError::precondition(format!(
                "invalid namespace name '{}'",
                self.namespace
            )));
        }
        if self.groups_count == 0 {
            return Err(MastermindError::precondition(
                "groups-count must be a positive integer",
            ));
        }
        if let Some(static_couple) = &self.static_couple {
            if static_couple.len() != self.groups_count as usize {
                return Err(MastermindError::precondition(format!(
                    "static-couple must contain exactly groups-count ({}) groups",
                    self.groups_count
                )));
            }
        }
        Ok(())
    }
}

/// Settings storage over the metadata session.
pub struct NamespaceRegistry {
    meta: Session,
}

impl NamespaceRegistry {
    pub fn new(meta: Session) -> Self {
        NamespaceRegistry { meta }
    }

    /// All namespace names present in the index. A missing index means no
    /// namespace has ever been set up.
    pub async fn list(&self) -> Result<Vec<String>, MastermindError> {
        match self.meta.read_data(keys::MM_NAMESPACE_SETTINGS_IDX).await {
            Ok(blob) => Ok(rmp_serde::from_slice(&blob)
                .map_err(|e| MastermindError::MetaParse(e.to_string()))?),
            Err(SessionError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, namespace: &str) -> Result<NamespaceSettings, MastermindError> {
        let key = keys::namespace_settings_key(namespace);
        match self.meta.read_data(&key).await {
            Ok(blob) => Ok(rmp_serde::from_slice(&blob)
                .map_err(|e| MastermindError::MetaParse(e.to_string()))?),
            Err(SessionError::NotFound) => Err(MastermindError::not_found(format!(
                "No settings found for namespace {namespace}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_all(&self) -> Result<Vec<NamespaceSettings>, MastermindError> {
        let mut all = Vec::new();
        for namespace in self.list().await? {
            all.push(self.get(&namespace).await?);
        }
        Ok(all)
    }

    /// Persists validated settings and inserts the namespace into the index
    /// when it is new.
    pub async fn setup(&self, settings: &NamespaceSettings) -> Result<(), MastermindError> {
        settings.validate()?;

        let blob = rmp_serde::to_vec_named(settings)?;
        let key = keys::namespace_settings_key(&settings.namespace);
        self.meta.write_data(&key, &blob).await?;

        let mut index = self.list().await?;
        if !index.iter().any(|ns| ns == &settings.namespace) {
            index.push(settings.namespace.clone());
            let index_blob = rmp_serde::to_vec(&index)?;
            self.meta
                .write_data(keys::MM_NAMESPACE_SETTINGS_IDX, &index_blob)
                .await?;
        }
        info!("namespace '{}' settings updated", settings.namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(namespace: &str) -> NamespaceSettings {
        NamespaceSettings {
            namespace: namespace.to_string(),
            groups_count: 3,
            success_copies_num: SuccessCopies::Quorum,
            static_couple: None,
        }
    }

    #[test]
    fn test_namespace_name_validation() {
        assert!(settings("web").validate().is_ok());
        assert!(settings("web-2_x").validate().is_ok());
        assert!(settings("-web").validate().is_err());
        assert!(settings("web-").validate().is_err());
        assert!(settings("").validate().is_err());
        assert!(settings("with space").validate().is_err());
    }

    #[test]
    fn test_groups_count_must_be_positive() {
        let mut s = settings("web");
        s.groups_count = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_static_couple_length_must_match() {
        let mut s = settings("web");
        s.static_couple = Some(vec![1, 2]);
        assert!(s.validate().is_err());
        s.static_couple = Some(vec![1, 2, 3]);
        assert!(s.validate().is_ok());
    }
}
