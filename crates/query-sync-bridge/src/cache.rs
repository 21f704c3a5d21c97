//! Query result cache with staleness flags.

use crate::{Query, Scope, SyncResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Runs a query against the control plane.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, query: &Query) -> SyncResult<Value>;
}

/// One cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    /// The next read must re-fetch.
    pub stale: bool,
    /// Cache-wide write counter at the time of the last write. Marking an
    /// entry stale does not change it.
    pub version: u64,
}

/// Cached control-plane reads.
///
/// Invalidation only flips flags and never fetches; the fetch happens on
/// the next [`read`](QueryCache::read). Staleness marks are idempotent, so
/// concurrent invalidations from several channels converge.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<Query, CacheEntry>>,
    versions: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Cached entry, fresh or stale.
    pub fn get(&self, query: &Query) -> Option<CacheEntry> {
        self.entries.read().get(query).cloned()
    }

    /// Store a fresh value. Returns the version written.
    pub fn set(&self, query: Query, value: Value) -> u64 {
        let version = self.next_version();
        self.entries.write().insert(
            query,
            CacheEntry {
                value,
                stale: false,
                version,
            },
        );
        version
    }

    /// Write `update(current)` and return the previous value with the
    /// version written. Snapshot and write happen under one lock.
    pub fn replace_with<F>(&self, query: &Query, update: F) -> (Option<Value>, u64)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut entries = self.entries.write();
        let previous = entries.get(query).map(|entry| entry.value.clone());
        let value = update(previous.as_ref());
        let version = self.next_version();
        entries.insert(
            query.clone(),
            CacheEntry {
                value,
                stale: false,
                version,
            },
        );
        (previous, version)
    }

    /// Put `snapshot` back if the entry still carries `version`.
    ///
    /// A `None` snapshot removes the entry. Returns `false` without
    /// touching anything when a newer write has happened.
    pub fn restore_if(&self, query: &Query, version: u64, snapshot: Option<Value>) -> bool {
        let mut entries = self.entries.write();
        if entries.get(query).map(|entry| entry.version) != Some(version) {
            return false;
        }

        match snapshot {
            Some(value) => {
                let version = self.next_version();
                entries.insert(
                    query.clone(),
                    CacheEntry {
                        value,
                        stale: false,
                        version,
                    },
                );
            }
            None => {
                entries.remove(query);
            }
        }
        true
    }

    pub fn remove(&self, query: &Query) -> Option<CacheEntry> {
        self.entries.write().remove(query)
    }

    /// Mark one entry stale. Returns `false` if it is not cached.
    pub fn invalidate(&self, query: &Query) -> bool {
        match self.entries.write().get_mut(query) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Mark every entry in `scope` stale. Returns how many matched.
    pub fn invalidate_scope(&self, scope: Scope) -> usize {
        let mut entries = self.entries.write();
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(query, _)| query.scope() == scope) {
            entry.stale = true;
            count += 1;
        }
        count
    }

    pub fn is_stale(&self, query: &Query) -> Option<bool> {
        self.entries.read().get(query).map(|entry| entry.stale)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached value when fresh, otherwise fetch and store.
    ///
    /// A result is not stored if the entry was written while the fetch was
    /// in flight (an optimistic mutation, say); the caller still gets it.
    pub async fn read(&self, query: &Query, fetcher: &dyn QueryFetcher) -> SyncResult<Value> {
        let seen = match self.get(query) {
            Some(entry) if !entry.stale => return Ok(entry.value),
            Some(entry) => Some(entry.version),
            None => None,
        };

        debug!(query = %query, "Fetching");
        let value = fetcher.fetch(query).await?;

        let mut entries = self.entries.write();
        if entries.get(query).map(|entry| entry.version) == seen {
            let version = self.next_version();
            entries.insert(
                query.clone(),
                CacheEntry {
                    value: value.clone(),
                    stale: false,
                    version,
                },
            );
        } else {
            debug!(query = %query, "Entry written during fetch, keeping newer value");
        }

        Ok(value)
    }
}
