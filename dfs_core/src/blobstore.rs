use crate::error::{DfsError, DfsResult};
use crate::id::BlobId;
use crate::node::Node;
use std::fmt::Debug;
use std::io::Read;
use std::path::Path;

pub type BlobReader = Box<dyn Read + Send>;

/// Byte storage for node content, addressed by `(space_id, blob_id)`.
pub trait Blobstore: Send + Sync + Debug {
    /// Stores the full content of `source` as the node's blob. Readers never
    /// observe a partially written blob.
    fn upload(&self, node: &Node, source: &Path) -> DfsResult<()>;

    /// Opens the node's blob positioned at offset zero.
    /// Fails with `BlobNotFound` if it does not exist.
    fn download(&self, node: &Node) -> DfsResult<BlobReader>;

    /// Removes the node's blob. Absent blobs are not an error.
    fn delete(&self, node: &Node) -> DfsResult<()>;
}

/// Returns the node's blob id or `InvalidArgument`.
pub fn require_blob_id(node: &Node) -> DfsResult<&BlobId> {
    node.blob_id
        .as_ref()
        .ok_or_else(|| DfsError::InvalidArgument(format!("node {} has no blob id", node.id)))
}
