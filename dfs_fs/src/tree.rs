//! Hierarchical operations over nodes.

use crate::lookup::PathLookup;
use dfs_core::node::validate_name;
use dfs_core::{
    BlobReader, Blobstore, DfsError, DfsResult, Node, NodeId, NodeType, Owner, SpaceId, Timestamp,
    TrashInfo, TrashRecord,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub struct Tree {
    lookup: Arc<dyn PathLookup>,
    blobstore: Arc<dyn Blobstore>,
    initialized: AtomicBool,
}

impl Tree {
    pub fn new(lookup: Arc<dyn PathLookup>, blobstore: Arc<dyn Blobstore>) -> Self {
        Self {
            lookup,
            blobstore,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn lookup(&self) -> &Arc<dyn PathLookup> {
        &self.lookup
    }

    pub fn blobstore(&self) -> &Arc<dyn Blobstore> {
        &self.blobstore
    }

    /// Prepares the metadata storage. Must run before anything else.
    pub fn setup(&self) -> DfsResult<()> {
        self.lookup.metadata().setup()?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_initialized(&self) -> DfsResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DfsError::NotInitialized("tree setup has not run".into()))
        }
    }

    pub fn create_space(&self, space_id: &SpaceId, owner: Option<Owner>) -> DfsResult<Node> {
        self.ensure_initialized()?;
        let metadata = self.lookup.metadata();
        if metadata.id_in_use(space_id, &NodeId::space_root(space_id))? {
            return Err(DfsError::AlreadyExists(format!("space {space_id}")));
        }
        let root = Node::space_root(space_id.clone(), owner);
        metadata.write_node(&root)?;
        info!(space = %space_id, "created space");
        Ok(root)
    }

    fn allocate_id(&self, space_id: &SpaceId) -> DfsResult<NodeId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = NodeId::generate();
            if !self.lookup.metadata().id_in_use(space_id, &id)? {
                return Ok(id);
            }
        }
        Err(DfsError::Backend("could not allocate an unused node id".into()))
    }

    /// Creates an empty file or container named `name` below `parent`.
    pub fn create(&self, parent: &Node, name: &str, node_type: NodeType) -> DfsResult<Node> {
        self.ensure_initialized()?;
        validate_name(name)?;
        if !parent.is_dir() {
            return Err(DfsError::InvalidArgument(format!(
                "cannot create '{name}' below file {}",
                parent.id
            )));
        }
        if parent.is_trashed() {
            return Err(DfsError::NotFound(format!("parent {} is trashed", parent.id)));
        }

        let metadata = self.lookup.metadata();
        let id = self.allocate_id(&parent.space_id)?;
        let node = match node_type {
            NodeType::Container => {
                Node::new_container(parent.space_id.clone(), id, Some(parent.id.clone()), name)
            }
            NodeType::File => {
                Node::new_file(parent.space_id.clone(), id, parent.id.clone(), name)
            }
        };

        metadata.write_node(&node)?;
        if let Err(e) = metadata.link_child(&node.space_id, &parent.id, name, &node.id) {
            if let Err(cleanup) = metadata.purge_node(&node.space_id, &node.id) {
                warn!(node = %node.id, error = %cleanup, "failed to remove unlinked node");
            }
            return Err(e);
        }
        debug!(space = %node.space_id, node = %node.id, name, "created node");
        Ok(node)
    }

    /// Lazily iterates the active children of `dir`.
    pub fn list(&self, dir: &Node) -> DfsResult<Children> {
        self.ensure_initialized()?;
        if !dir.is_dir() {
            return Err(DfsError::InvalidArgument(format!("{} is not a container", dir.id)));
        }
        let entries = self.lookup.metadata().children(&dir.space_id, &dir.id)?;
        Ok(Children {
            lookup: self.lookup.clone(),
            space_id: dir.space_id.clone(),
            entries,
            pos: 0,
        })
    }

    pub(crate) fn is_ancestor_or_self(&self, candidate: &NodeId, node: &Node) -> DfsResult<bool> {
        let mut current = node.clone();
        loop {
            if &current.id == candidate {
                return Ok(true);
            }
            match &current.parent_id {
                Some(parent_id) => {
                    current = self.lookup.node_from_id(&current.space_id, parent_id)?;
                }
                None => return Ok(false),
            }
        }
    }

    /// Renames and/or reparents `node` in place. Its id and blob stay the
    /// same. An active node already at the target is purged.
    pub fn move_node(&self, node: &Node, new_parent: &Node, new_name: &str) -> DfsResult<Node> {
        self.ensure_initialized()?;
        validate_name(new_name)?;
        if node.space_id != new_parent.space_id {
            return Err(DfsError::NotSupported(
                "moving nodes across spaces is not supported".into(),
            ));
        }
        let Some(old_parent) = node.parent_id.clone() else {
            return Err(DfsError::InvalidArgument("the space root cannot be moved".into()));
        };
        if !new_parent.is_dir() {
            return Err(DfsError::InvalidArgument(format!(
                "move target parent {} is not a container",
                new_parent.id
            )));
        }
        if node.is_dir() && self.is_ancestor_or_self(&node.id, new_parent)? {
            return Err(DfsError::InvalidArgument(format!(
                "cannot move {} into its own subtree",
                node.id
            )));
        }
        if old_parent == new_parent.id && node.name == new_name {
            return Ok(node.clone());
        }

        let metadata = self.lookup.metadata();
        let space_id = &node.space_id;
        if let Some(existing_id) = metadata.child(space_id, &new_parent.id, new_name)? {
            match self.lookup.node_from_id(space_id, &existing_id) {
                Ok(existing) => {
                    if self.is_ancestor_or_self(&existing.id, node)? {
                        return Err(DfsError::InvalidArgument(format!(
                            "move target {} contains the source",
                            existing.id
                        )));
                    }
                    self.purge_subtree(&existing)?
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            metadata.unlink_child(space_id, &new_parent.id, new_name)?;
        }

        metadata.link_child(space_id, &new_parent.id, new_name, &node.id)?;
        let mut moved = node.clone();
        moved.parent_id = Some(new_parent.id.clone());
        moved.name = new_name.to_string();
        if let Err(e) = metadata.write_node(&moved) {
            if let Err(cleanup) = metadata.unlink_child(space_id, &new_parent.id, new_name) {
                warn!(node = %node.id, error = %cleanup, "failed to roll back move link");
            }
            return Err(e);
        }
        metadata.unlink_child(space_id, &old_parent, &node.name)?;
        self.invalidate_paths(&moved)?;
        debug!(space = %space_id, node = %node.id, to = %new_parent.id, name = new_name, "moved node");
        Ok(moved)
    }

    /// Soft-deletes `node`: records its origin, marks it trashed and
    /// unlinks it from its parent. Its children stay linked below it.
    pub fn delete(&self, node: &Node) -> DfsResult<TrashRecord> {
        self.ensure_initialized()?;
        let Some(parent_id) = &node.parent_id else {
            return Err(DfsError::InvalidArgument("the space root cannot be deleted".into()));
        };
        if node.is_trashed() {
            return Err(DfsError::NotFound(format!("{} is already trashed", node.id)));
        }

        let metadata = self.lookup.metadata();
        let origin = self.lookup.path(node)?;
        let deleted_at = Timestamp::now();
        let record = TrashRecord {
            key: node.id.to_string(),
            space_id: node.space_id.clone(),
            node_id: node.id.clone(),
            origin: origin.clone(),
            deleted_at,
        };
        metadata.write_trash(&record)?;

        let mut trashed = node.clone();
        trashed.trashed = Some(TrashInfo { origin, deleted_at });
        let marked = metadata
            .write_node(&trashed)
            .and_then(|_| metadata.unlink_child(&node.space_id, parent_id, &node.name));
        if let Err(e) = marked {
            if let Err(cleanup) = metadata.write_node(node) {
                warn!(node = %node.id, error = %cleanup, "failed to roll back trash mark");
            }
            if let Err(cleanup) = metadata.remove_trash(&node.space_id, &record.key) {
                warn!(node = %node.id, error = %cleanup, "failed to roll back trash record");
            }
            return Err(e);
        }

        self.invalidate_paths(node)?;
        info!(space = %node.space_id, node = %node.id, origin = %record.origin, "trashed node");
        Ok(record)
    }

    /// Permanently removes `node` and everything below it, including blobs
    /// and revision blobs. Ids are retired.
    pub fn purge_subtree(&self, node: &Node) -> DfsResult<()> {
        let metadata = self.lookup.metadata();
        if node.is_dir() {
            for (_, child_id) in metadata.children(&node.space_id, &node.id)? {
                match self.lookup.node_from_id(&node.space_id, &child_id) {
                    Ok(child) => self.purge_subtree(&child)?,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.delete_blob(node)?;
        for revision in &node.revisions {
            if revision.blob_id.is_some() {
                let mut old = node.clone();
                old.blob_id = revision.blob_id.clone();
                self.blobstore.delete(&old)?;
            }
        }
        metadata.purge_node(&node.space_id, &node.id)?;
        if let Err(e) = self.lookup.id_cache().delete(&node.space_id, &node.id) {
            warn!(node = %node.id, error = %e, "failed to drop cached path");
        }
        debug!(space = %node.space_id, node = %node.id, "purged node");
        Ok(())
    }

    pub fn write_blob(&self, node: &Node, source: &Path) -> DfsResult<()> {
        self.ensure_initialized()?;
        self.blobstore.upload(node, source)
    }

    /// Files without a blob read as empty.
    pub fn read_blob(&self, node: &Node) -> DfsResult<BlobReader> {
        self.ensure_initialized()?;
        if node.is_dir() {
            return Err(DfsError::InvalidArgument(format!("{} is a container", node.id)));
        }
        match node.blob_id {
            Some(_) => self.blobstore.download(node),
            None => Ok(Box::new(std::io::empty())),
        }
    }

    pub fn delete_blob(&self, node: &Node) -> DfsResult<()> {
        match node.blob_id {
            Some(_) => self.blobstore.delete(node),
            None => Ok(()),
        }
    }

    /// Total content size of `node` and its descendants.
    pub fn tree_size(&self, node: &Node) -> DfsResult<u64> {
        if !node.is_dir() {
            return Ok(node.blob_size);
        }
        let mut size = 0;
        for (_, child_id) in self.lookup.metadata().children(&node.space_id, &node.id)? {
            match self.lookup.node_from_id(&node.space_id, &child_id) {
                Ok(child) => size += self.tree_size(&child)?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(size)
    }

    /// Drops cached paths of `node` and its descendants.
    pub fn invalidate_paths(&self, node: &Node) -> DfsResult<()> {
        self.lookup.id_cache().delete(&node.space_id, &node.id)?;
        if node.is_dir() {
            for (_, child_id) in self.lookup.metadata().children(&node.space_id, &node.id)? {
                match self.lookup.node_from_id(&node.space_id, &child_id) {
                    Ok(child) => self.invalidate_paths(&child)?,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// Iterator over the active children of a container, sorted by name.
///
/// Node records are read on demand; entries whose record is missing or
/// trashed are skipped. [`Children::rewind`] starts over.
#[derive(Debug, Clone)]
pub struct Children {
    lookup: Arc<dyn PathLookup>,
    space_id: SpaceId,
    entries: Vec<(String, NodeId)>,
    pos: usize,
}

impl Children {
    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for Children {
    type Item = DfsResult<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((name, id)) = self.entries.get(self.pos) {
            self.pos += 1;
            match self.lookup.node_from_id(&self.space_id, id) {
                Ok(node) if node.is_trashed() => continue,
                Ok(node) => return Some(Ok(node)),
                Err(e) if e.is_not_found() => {
                    debug!(space = %self.space_id, %name, "skipping dangling child entry");
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
