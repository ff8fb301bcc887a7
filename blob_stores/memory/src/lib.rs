use bytes::Bytes;
use dashmap::DashMap;
use dfs_core::blobstore::{BlobReader, Blobstore, require_blob_id};
use dfs_core::error::IoResultExt;
use dfs_core::{BlobId, DfsError, DfsResult, Node, SpaceId};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Keeps blobs in process memory. Content is read fully before it becomes
/// visible, so downloads never see partial uploads.
#[derive(Debug, Default)]
pub struct MemoryBlobstore {
    blobs: DashMap<(SpaceId, BlobId), Bytes>,
}

impl MemoryBlobstore {
    /// Creates a new, empty `MemoryBlobstore`.
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, space_id: &SpaceId, blob_id: &BlobId) -> bool {
        self.blobs
            .contains_key(&(space_id.clone(), blob_id.clone()))
    }

    fn key(node: &Node) -> DfsResult<(SpaceId, BlobId)> {
        Ok((node.space_id.clone(), require_blob_id(node)?.clone()))
    }
}

impl Blobstore for MemoryBlobstore {
    fn upload(&self, node: &Node, source: &Path) -> DfsResult<()> {
        let key = Self::key(node)?;
        let content = std::fs::read(source).io_context(|| format!("read {}", source.display()))?;
        debug!(space = %key.0, blob = %key.1, bytes = content.len(), "stored blob");
        self.blobs.insert(key, Bytes::from(content));
        Ok(())
    }

    fn download(&self, node: &Node) -> DfsResult<BlobReader> {
        let key = Self::key(node)?;
        // Bytes clones share the buffer
        let content = self
            .blobs
            .get(&key)
            .map(|b| b.value().clone())
            .ok_or_else(|| DfsError::BlobNotFound(format!("{}/{}", key.0, key.1)))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn delete(&self, node: &Node) -> DfsResult<()> {
        self.blobs.remove(&Self::key(node)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::testutil::BlobstoreTests;

    #[test]
    fn test_memory_blobstore() {
        let store = MemoryBlobstore::new();
        BlobstoreTests::new(&store).run_all().unwrap();
        // every non-deleted upload is still held
        assert!(!store.is_empty());
    }
}
