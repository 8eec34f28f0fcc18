// src/core/session.rs

//! The storage-client surface the coordinator consumes, and an in-memory
//! backend implementing it.
//!
//! A [`Session`] scopes a shared [`StorageBackend`] to an explicit group set
//! and a timeout, mirroring how per-operation sessions are acquired at the
//! call site and dropped on every exit path. The backend itself is the
//! pluggable piece: production embeds a real storage client, development and
//! tests use [`MemoryBackend`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::MastermindError;
use crate::core::stats::RawNodeStat;
use crate::core::topology::GroupId;

/// Failures of a single storage operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The key does not exist in any group of the session's scope.
    #[error("key not found")]
    NotFound,

    #[error("operation timed out")]
    Timeout,

    /// The backend does not implement this call (e.g. `stat_log_count` on
    /// an old fleet); the caller falls back.
    #[error("operation not supported")]
    Unsupported,

    #[error("{0}")]
    Backend(String),
}

impl From<SessionError> for MastermindError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => MastermindError::not_found("key not found"),
            SessionError::Timeout => MastermindError::Timeout,
            other => MastermindError::Storage(other.to_string()),
        }
    }
}

/// One read result from one group of the session scope.
#[derive(Debug, Clone)]
pub struct ReadEntry {
    pub group: GroupId,
    pub data: Vec<u8>,
}

/// The raw operations of the storage client. All data-addressed calls take
/// the explicit group scope; the per-node stat log and address lookups are
/// fleet-wide.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, groups: &[GroupId], key: &str) -> Result<Vec<ReadEntry>, SessionError>;

    async fn write(&self, groups: &[GroupId], key: &str, data: &[u8])
    -> Result<(), SessionError>;

    /// Idempotent: removing an absent key is not an error.
    async fn remove(&self, groups: &[GroupId], key: &str) -> Result<(), SessionError>;

    async fn lookup_addr(&self, group: GroupId) -> Result<String, SessionError>;

    async fn stat_log_count(&self) -> Result<Vec<RawNodeStat>, SessionError>;

    async fn stat_log(&self) -> Result<Vec<RawNodeStat>, SessionError>;
}

/// A backend handle scoped to a group set and a timeout.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn StorageBackend>,
    groups: Vec<GroupId>,
    timeout: Duration,
}

impl Session {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Session {
            backend,
            groups: Vec::new(),
            timeout,
        }
    }

    /// A session over the same backend scoped to a different group set.
    pub fn scoped(&self, groups: Vec<GroupId>) -> Session {
        Session {
            backend: self.backend.clone(),
            groups,
            timeout: self.timeout,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Reads a key, returning the first entry's payload. A timed-out read
    /// surfaces as [`SessionError::Timeout`]; the reconciler treats it the
    /// same as a missing key.
    pub async fn read_data(&self, key: &str) -> Result<Vec<u8>, SessionError> {
        match tokio::time::timeout(self.timeout, self.backend.read(&self.groups, key)).await {
            Ok(result) => {
                let entries = result?;
                entries
                    .into_iter()
                    .next()
                    .map(|e| e.data)
                    .ok_or(SessionError::NotFound)
            }
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub async fn write_data(&self, key: &str, data: &[u8]) -> Result<(), SessionError> {
        match tokio::time::timeout(self.timeout, self.backend.write(&self.groups, key, data)).await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), SessionError> {
        match tokio::time::timeout(self.timeout, self.backend.remove(&self.groups, key)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub async fn lookup_addr(&self, group: GroupId) -> Result<String, SessionError> {
        self.backend.lookup_addr(group).await
    }

    /// Per-node counter rows, preferring the richer `stat_log_count` call.
    pub async fn fetch_stats(&self) -> Result<Vec<RawNodeStat>, SessionError> {
        match self.backend.stat_log_count().await {
            Err(SessionError::Unsupported) => self.backend.stat_log().await,
            other => other,
        }
    }
}

/// An in-memory [`StorageBackend`] storing one value per `(group, key)`
/// pair. Writes land in every group of the scope; reads return the entries
/// of the groups that have the key, in scope order.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<(GroupId, String), Vec<u8>>,
    stat_rows: Mutex<Vec<RawNodeStat>>,
    addrs: DashMap<GroupId, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Replaces the counter rows the next `stat_log_count` call returns.
    pub fn set_stat_rows(&self, rows: Vec<RawNodeStat>) {
        *self.stat_rows.lock() = rows;
    }

    pub fn set_addr(&self, group: GroupId, addr: impl Into<String>) {
        self.addrs.insert(group, addr.into());
    }

    /// Direct fixture access for a single group's key.
    pub fn put(&self, group: GroupId, key: &str, data: Vec<u8>) {
        self.entries.insert((group, key.to_string()), data);
    }

    pub fn get(&self, group: GroupId, key: &str) -> Option<Vec<u8>> {
        self.entries
            .get(&(group, key.to_string()))
            .map(|e| e.clone())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, groups: &[GroupId], key: &str) -> Result<Vec<ReadEntry>, SessionError> {
        let entries: Vec<ReadEntry> = groups
            .iter()
            .filter_map(|g| {
                self.entries
                    .get(&(*g, key.to_string()))
                    .map(|data| ReadEntry {
                        group: *g,
                        data: data.clone(),
                    })
            })
            .collect();
        if entries.is_empty() {
            return Err(SessionError::NotFound);
        }
        Ok(entries)
    }

    async fn write(
        &self,
        groups: &[GroupId],
        key: &str,
        data: &[u8],
    ) -> Result<(), SessionError> {
        if groups.is_empty() {
            return Err(SessionError::Backend("empty session scope".to_string()));
        }
        for g in groups {
            self.entries.insert((*g, key.to_string()), data.to_vec());
        }
        Ok(())
    }

    async fn remove(&self, groups: &[GroupId], key: &str) -> Result<(), SessionError> {
        for g in groups {
            self.entries.remove(&(*g, key.to_string()));
        }
        Ok(())
    }

    async fn lookup_addr(&self, group: GroupId) -> Result<String, SessionError> {
        self.addrs
            .get(&group)
            .map(|a| a.clone())
            .ok_or(SessionError::NotFound)
    }

    async fn stat_log_count(&self) -> Result<Vec<RawNodeStat>, SessionError> {
        Ok(self.stat_rows.lock().clone())
    }

    async fn stat_log(&self) -> Result<Vec<RawNodeStat>, SessionError> {
        Ok(self.stat_rows.lock().clone())
    }
}
