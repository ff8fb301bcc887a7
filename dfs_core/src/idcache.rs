//! Cache of `(space, node)` keyed values, used to remember node paths.

use crate::error::DfsResult;
use crate::id::{NodeId, SpaceId};
use moka::Expiry;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Separator of the composite cache key. Ids cannot contain it.
pub const KEY_SEPARATOR: char = '!';

/// Key/value storage behind an [`IdCache`].
pub trait IdStore: Send + Sync + Debug {
    /// Returns `None` for unknown or expired keys.
    fn read(&self, key: &str) -> DfsResult<Option<String>>;
    /// `ttl` of `None` keeps the entry until it is deleted or evicted.
    fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> DfsResult<()>;
    fn delete(&self, key: &str) -> DfsResult<()>;
}

#[derive(Debug, Clone)]
pub struct IdCache {
    store: Arc<dyn IdStore>,
    ttl: Option<Duration>,
}

impl IdCache {
    pub fn new(store: Arc<dyn IdStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
        Self::new(Arc::new(MemoryIdStore::new(max_entries)), ttl)
    }

    fn key(space_id: &SpaceId, node_id: &NodeId) -> String {
        format!("{space_id}{KEY_SEPARATOR}{node_id}")
    }

    pub fn set(&self, space_id: &SpaceId, node_id: &NodeId, value: &str) -> DfsResult<()> {
        self.store
            .write(&Self::key(space_id, node_id), value, self.ttl)
    }

    /// Store failures are logged and reported as a miss.
    pub fn get(&self, space_id: &SpaceId, node_id: &NodeId) -> Option<String> {
        match self.store.read(&Self::key(space_id, node_id)) {
            Ok(value) => value,
            Err(e) => {
                warn!(space = %space_id, node = %node_id, error = %e, "id cache read failed");
                None
            }
        }
    }

    pub fn delete(&self, space_id: &SpaceId, node_id: &NodeId) -> DfsResult<()> {
        self.store.delete(&Self::key(space_id, node_id))
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    ttl: Option<Duration>,
}

/// Expires every entry after the ttl it was written with.
struct WriteTtl;

impl Expiry<String, MemoryEntry> for WriteTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// In-process [`IdStore`] with per-entry TTL and an optional size bound.
pub struct MemoryIdStore {
    entries: moka::sync::Cache<String, MemoryEntry>,
}

impl MemoryIdStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        let mut builder = moka::sync::Cache::builder()
            .name("id_cache")
            .expire_after(WriteTtl);
        if let Some(max) = max_entries {
            builder = builder.max_capacity(max as u64);
        }
        Self {
            entries: builder.build(),
        }
    }

    /// Entry count after pending evictions have been applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryIdStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Debug for MemoryIdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdStore")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl IdStore for MemoryIdStore {
    fn read(&self, key: &str) -> DfsResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> DfsResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> DfsResult<()> {
        self.entries.invalidate(key);
        Ok(())
    }
}
