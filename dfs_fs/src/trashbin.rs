//! Trash-bin operations: list, restore and purge soft-deleted nodes.
//!
//! Items are addressed by the trash key of a trash root plus a path
//! relative to it, so children of a trashed directory can be listed,
//! restored and purged individually.

use crate::tree::Tree;
use dfs_core::node::{join_path, path_segments};
use dfs_core::{
    DfsError, DfsResult, Node, NodeType, Reference, SpaceId, Timestamp, TrashRecord,
};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An entry of a trash listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecycleItem {
    pub key: String,
    /// Path below the trash root; `/` for the root itself.
    pub relative_path: String,
    /// Where the item lived before deletion.
    pub reference: Reference,
    pub node_type: NodeType,
    pub size: u64,
    pub deletion_time: Timestamp,
}

/// Outcome of a batch purge. Failures do not stop the batch.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub purged: Vec<String>,
    pub failed: Vec<(String, DfsError)>,
}

impl PurgeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub trait Trashbin: Send + Sync + Debug {
    /// With an empty key lists all trash roots of the space; otherwise the
    /// addressed item, or its children if it is a directory.
    fn list_recycle(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<Vec<RecycleItem>>;

    /// Resolves a trash item to its record and node.
    fn recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<(TrashRecord, Node)>;

    /// Makes the item active again at `restore_ref`, or at its origin when
    /// none is given.
    fn restore_recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
        restore_ref: Option<&Reference>,
    ) -> DfsResult<Node>;

    fn purge_recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<()>;

    fn empty_recycle(&self, reference: &Reference) -> DfsResult<PurgeReport>;

    /// Purges trash roots deleted more than `older_than` ago.
    fn purge_expired(&self, reference: &Reference, older_than: Duration)
    -> DfsResult<PurgeReport>;
}

fn is_root_path(relative_path: &str) -> DfsResult<bool> {
    Ok(path_segments(relative_path)?.is_empty())
}

/// Trash-bin on top of the [`Tree`]'s soft-delete.
#[derive(Debug)]
pub struct DecomposedTrashbin {
    tree: Arc<Tree>,
}

impl DecomposedTrashbin {
    pub fn new(tree: Arc<Tree>) -> Self {
        Self { tree }
    }

    fn item_origin(record: &TrashRecord, relative_path: &str) -> DfsResult<String> {
        let mut origin = record.origin.clone();
        for segment in path_segments(relative_path)? {
            origin = join_path(&origin, segment);
        }
        Ok(origin)
    }

    fn listing_entry(
        &self,
        record: &TrashRecord,
        relative_path: String,
        node: &Node,
    ) -> DfsResult<RecycleItem> {
        Ok(RecycleItem {
            key: record.key.clone(),
            reference: Reference::path(
                record.space_id.clone(),
                Self::item_origin(record, &relative_path)?,
            ),
            relative_path,
            node_type: node.node_type,
            size: self.tree.tree_size(node)?,
            deletion_time: record.deleted_at,
        })
    }

    fn purge_records<'a>(
        &self,
        reference: &Reference,
        records: impl IntoIterator<Item = &'a TrashRecord>,
    ) -> PurgeReport {
        let mut report = PurgeReport::default();
        for record in records {
            match self.purge_recycle_item(reference, &record.key, "") {
                Ok(()) => report.purged.push(record.key.clone()),
                Err(e) => {
                    warn!(space = %reference.space_id, key = %record.key, error = %e, "failed to purge trash item");
                    report.failed.push((record.key.clone(), e));
                }
            }
        }
        report
    }

    fn space(reference: &Reference) -> &SpaceId {
        &reference.space_id
    }
}

impl Trashbin for DecomposedTrashbin {
    fn list_recycle(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<Vec<RecycleItem>> {
        let space_id = Self::space(reference);
        let metadata = self.tree.lookup().metadata();

        if key.is_empty() {
            let mut items = Vec::new();
            for record in metadata.list_trash(space_id)? {
                match self.tree.lookup().node_from_id(space_id, &record.node_id) {
                    Ok(node) => items.push(self.listing_entry(&record, "/".into(), &node)?),
                    Err(e) if e.is_not_found() => {
                        warn!(space = %space_id, key = %record.key, "trash record without node");
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(items);
        }

        let (record, item) = self.recycle_item(reference, key, relative_path)?;
        let relative_path = join_path("", relative_path);
        if !item.is_dir() {
            return Ok(vec![self.listing_entry(&record, relative_path, &item)?]);
        }
        let mut items = Vec::new();
        for (name, child_id) in metadata.children(space_id, &item.id)? {
            match self.tree.lookup().node_from_id(space_id, &child_id) {
                Ok(child) => {
                    items.push(self.listing_entry(&record, join_path(&relative_path, &name), &child)?)
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    fn recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<(TrashRecord, Node)> {
        let space_id = Self::space(reference);
        let lookup = self.tree.lookup();
        let record = lookup.metadata().read_trash(space_id, key)?;
        let root = lookup
            .node_from_id(space_id, &record.node_id)
            .map_err(|e| match e {
                DfsError::NotFound(_) => {
                    DfsError::NotFound(format!("trash item {key} in space {space_id}"))
                }
                e => e,
            })?;
        if !root.is_trashed() {
            return Err(DfsError::NotFound(format!(
                "trash item {key} in space {space_id}"
            )));
        }
        let item = lookup.walk_path(&root, relative_path, &mut |_, _| Ok(()))?;
        Ok((record, item))
    }

    fn restore_recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
        restore_ref: Option<&Reference>,
    ) -> DfsResult<Node> {
        let space_id = Self::space(reference);
        let (record, item) = self.recycle_item(reference, key, relative_path)?;
        let at_root = is_root_path(relative_path)?;

        let target = match restore_ref {
            Some(r) => r.clone(),
            None => Reference::path(space_id.clone(), Self::item_origin(&record, relative_path)?),
        };
        if &target.space_id != space_id {
            return Err(DfsError::NotSupported(
                "restoring into another space is not supported".into(),
            ));
        }

        let lookup = self.tree.lookup();
        let metadata = lookup.metadata();
        if let Some(anchor_id) = &target.node_id {
            let anchor = lookup.node_from_id(space_id, anchor_id)?;
            if self.tree.is_ancestor_or_self(&item.id, &anchor)? {
                return Err(DfsError::InvalidArgument(format!(
                    "cannot restore {} into its own subtree",
                    item.id
                )));
            }
        }
        let (parent, name) = lookup.resolve_parent(&target)?;
        metadata.link_child(space_id, &parent.id, &name, &item.id)?;

        let mut restored = item.clone();
        restored.parent_id = Some(parent.id.clone());
        restored.name = name.clone();
        restored.trashed = None;
        if let Err(e) = metadata.write_node(&restored) {
            if let Err(cleanup) = metadata.unlink_child(space_id, &parent.id, &name) {
                warn!(node = %item.id, error = %cleanup, "failed to roll back restore link");
            }
            return Err(e);
        }

        if at_root {
            metadata.remove_trash(space_id, key)?;
        } else if let Some(trashed_parent) = &item.parent_id {
            metadata.unlink_child(space_id, trashed_parent, &item.name)?;
        }
        self.tree.invalidate_paths(&restored)?;

        info!(space = %space_id, key, relative_path, to = %target, "restored trash item");
        Ok(restored)
    }

    fn purge_recycle_item(
        &self,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<()> {
        let space_id = Self::space(reference);
        let metadata = self.tree.lookup().metadata();
        let at_root = is_root_path(relative_path)?;

        if at_root {
            let record = metadata.read_trash(space_id, key)?;
            // a previous purge may have died after removing the nodes
            if let Err(e) = self.tree.lookup().node_from_id(space_id, &record.node_id) {
                if e.is_not_found() {
                    debug!(space = %space_id, key, "dropping dangling trash record");
                    return metadata.remove_trash(space_id, key);
                }
                return Err(e);
            }
        }

        let (_, item) = self.recycle_item(reference, key, relative_path)?;
        self.tree.purge_subtree(&item)?;
        if at_root {
            metadata.remove_trash(space_id, key)?;
        } else if let Some(trashed_parent) = &item.parent_id {
            metadata.unlink_child(space_id, trashed_parent, &item.name)?;
        }
        info!(space = %space_id, key, relative_path, "purged trash item");
        Ok(())
    }

    fn empty_recycle(&self, reference: &Reference) -> DfsResult<PurgeReport> {
        let records = self
            .tree
            .lookup()
            .metadata()
            .list_trash(Self::space(reference))?;
        Ok(self.purge_records(reference, &records))
    }

    fn purge_expired(
        &self,
        reference: &Reference,
        older_than: Duration,
    ) -> DfsResult<PurgeReport> {
        let cutoff = Timestamp::now().saturating_sub(older_than);
        let records = self
            .tree
            .lookup()
            .metadata()
            .list_trash(Self::space(reference))?;
        let expired = records.iter().filter(|r| r.deleted_at < cutoff);
        Ok(self.purge_records(reference, expired))
    }
}
