//! RedbIdStore - a persistent `IdStore` backed by redb.
//!
//! redb holds an exclusive lock on its file, so a store is single-process:
//! engines inside one process share it through clones, while a second
//! process (or a second `open` of the same file) is refused until the
//! first handle is dropped. Replicas on separate hosts each need their own
//! file.

use dfs_core::{DfsError, DfsResult, IdStore};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// key -> (expiry in unix millis, 0 = never; value)
const TABLE: TableDefinition<&str, (u64, &str)> = TableDefinition::new("idcache");

fn backend_err<E: Into<redb::Error>>(e: E) -> DfsError {
    DfsError::Backend(format!("redb: {}", e.into()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn is_live(expires_at: u64, now: u64) -> bool {
    expires_at == 0 || expires_at > now
}

/// Id cache store persisted in a redb file. Clones share the database, so
/// one store can back several engines.
#[derive(Clone)]
pub struct RedbIdStore {
    db: Arc<Database>,
}

impl RedbIdStore {
    pub fn open<P: AsRef<Path>>(path: P) -> DfsResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DfsError::io(format!("create {}", parent.display()), e))?;
        }
        let db = Database::create(path).map_err(backend_err)?;

        // create the table so that first reads on a fresh file succeed
        {
            let write_txn = db.begin_write().map_err(backend_err)?;
            {
                let _ = write_txn.open_table(TABLE).map_err(backend_err)?;
            }
            write_txn.commit().map_err(backend_err)?;
        }

        let store = Self { db: Arc::new(db) };
        let purged = store.purge_expired()?;
        debug!(path = %path.display(), purged, "opened redb id cache");
        Ok(store)
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> DfsResult<u64> {
        let now = now_millis();
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut table = write_txn.open_table(TABLE).map_err(backend_err)?;
            let before = table.len().map_err(backend_err)?;
            table
                .retain(|_, (expires_at, _)| is_live(expires_at, now))
                .map_err(backend_err)?;
            before - table.len().map_err(backend_err)?
        };
        write_txn.commit().map_err(backend_err)?;
        Ok(removed)
    }
}

impl std::fmt::Debug for RedbIdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbIdStore").finish()
    }
}

impl IdStore for RedbIdStore {
    fn read(&self, key: &str) -> DfsResult<Option<String>> {
        let read_txn = self.db.begin_read().map_err(backend_err)?;
        let table = read_txn.open_table(TABLE).map_err(backend_err)?;
        let Some(guard) = table.get(key).map_err(backend_err)? else {
            return Ok(None);
        };
        let (expires_at, value) = guard.value();
        if !is_live(expires_at, now_millis()) {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> DfsResult<()> {
        let expires_at = match ttl {
            Some(ttl) => now_millis().saturating_add(ttl.as_millis().max(1) as u64),
            None => 0,
        };
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(backend_err)?;
            table
                .insert(key, (expires_at, value))
                .map_err(backend_err)?;
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> DfsResult<()> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(backend_err)?;
            table.remove(key).map_err(backend_err)?;
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::{IdCache, NodeId, SpaceId};

    #[test]
    fn roundtrip_through_id_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbIdStore::open(dir.path().join("idcache.redb")).unwrap();
        let cache = IdCache::new(Arc::new(store), None);
        let space = SpaceId::new("space1").unwrap();
        let node = NodeId::new("node1").unwrap();

        assert_eq!(cache.get(&space, &node), None);
        cache.set(&space, &node, "v").unwrap();
        assert_eq!(cache.get(&space, &node), Some("v".to_string()));
        cache.delete(&space, &node).unwrap();
        assert_eq!(cache.get(&space, &node), None);
    }

    #[test]
    fn entries_survive_reopen_until_they_expire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idcache.redb");
        {
            let store = RedbIdStore::open(&path).unwrap();
            store.write("forever", "a", None).unwrap();
            store
                .write("short", "b", Some(Duration::from_millis(10)))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(30));

        let store = RedbIdStore::open(&path).unwrap();
        assert_eq!(store.read("forever").unwrap(), Some("a".into()));
        assert_eq!(store.read("short").unwrap(), None);
    }

    #[test]
    fn a_second_open_of_the_same_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idcache.redb");
        let first = RedbIdStore::open(&path).unwrap();
        assert!(RedbIdStore::open(&path).is_err());
        drop(first);
        RedbIdStore::open(&path).unwrap();
    }

    #[test]
    fn clones_share_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = RedbIdStore::open(dir.path().join("idcache.redb")).unwrap();
        let b = a.clone();
        a.write("k", "v", None).unwrap();
        assert_eq!(b.read("k").unwrap(), Some("v".into()));
    }
}
