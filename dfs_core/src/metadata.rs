//! Persistence seam for node records, child indexes and trash records.

use crate::error::{DfsError, DfsResult};
use crate::id::{NodeId, SpaceId};
use crate::node::{Node, Timestamp};
use minicbor::{Decode, Encode};
use std::fmt::Debug;

/// A trash root: a node that was deleted directly (not as part of a
/// deleted directory).
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct TrashRecord {
    /// Trash key; the node id of the trashed node.
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub space_id: SpaceId,
    #[n(2)]
    pub node_id: NodeId,
    #[n(3)]
    pub origin: String,
    #[n(4)]
    pub deleted_at: Timestamp,
}

impl TrashRecord {
    pub fn to_bytes(&self) -> DfsResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| DfsError::Corrupt(format!("encode trash record: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> DfsResult<Self> {
        minicbor::decode(bytes)
            .map_err(|e| DfsError::Corrupt(format!("decode trash record: {e}")))
    }
}

/// Storage of node metadata.
///
/// Child-index mutations must be atomic per `(parent, name)`: of two
/// concurrent `link_child` calls for the same name exactly one succeeds.
pub trait MetadataBackend: Send + Sync + Debug {
    /// Prepares the backend's storage. Idempotent.
    fn setup(&self) -> DfsResult<()>;

    /// Ids of all spaces with a root node.
    fn list_spaces(&self) -> DfsResult<Vec<SpaceId>>;

    /// Fails with `NotFound` when there is no record.
    fn read_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<Node>;
    fn write_node(&self, node: &Node) -> DfsResult<()>;

    /// Removes the node record and its child index, and retires the id.
    fn purge_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<()>;

    /// True if `id` belongs to a live node or was retired by a purge.
    fn id_in_use(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<bool>;

    /// Fails with `AlreadyExists` if `name` is already linked under `parent`.
    fn link_child(
        &self,
        space_id: &SpaceId,
        parent: &NodeId,
        name: &str,
        child: &NodeId,
    ) -> DfsResult<()>;

    /// Unlinking an absent name is not an error.
    fn unlink_child(&self, space_id: &SpaceId, parent: &NodeId, name: &str) -> DfsResult<()>;

    fn child(&self, space_id: &SpaceId, parent: &NodeId, name: &str)
    -> DfsResult<Option<NodeId>>;

    /// Children of `parent` sorted by name.
    fn children(&self, space_id: &SpaceId, parent: &NodeId) -> DfsResult<Vec<(String, NodeId)>>;

    fn write_trash(&self, record: &TrashRecord) -> DfsResult<()>;

    /// Fails with `NotFound` when there is no record for `key`.
    fn read_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<TrashRecord>;

    /// Removing an absent record is not an error.
    fn remove_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<()>;

    fn list_trash(&self, space_id: &SpaceId) -> DfsResult<Vec<TrashRecord>>;
}
