//! Resolution of references to nodes.

use dfs_core::node::{join_path, path_segments};
use dfs_core::{DfsError, DfsResult, IdCache, MetadataBackend, Node, NodeId, Reference, SpaceId};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Resolves references to nodes. Everything except the two accessors has a
/// default implementation on top of the metadata backend and the id cache.
pub trait PathLookup: Send + Sync + Debug {
    fn metadata(&self) -> &dyn MetadataBackend;
    fn id_cache(&self) -> &IdCache;

    fn node_from_id(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<Node> {
        self.metadata().read_node(space_id, id)
    }

    fn node_from_space_id(&self, space_id: &SpaceId) -> DfsResult<Node> {
        self.node_from_id(space_id, &NodeId::space_root(space_id))
            .map_err(|e| match e {
                DfsError::NotFound(_) => DfsError::NotFound(format!("space {space_id}")),
                e => e,
            })
    }

    /// Follows `path` from `start`, calling `visitor` with every node
    /// reached, and returns the last one.
    fn walk_path(
        &self,
        start: &Node,
        path: &str,
        visitor: &mut dyn FnMut(&str, &Node) -> DfsResult<()>,
    ) -> DfsResult<Node> {
        let mut current = start.clone();
        for segment in path_segments(path)? {
            if !current.is_dir() {
                return Err(DfsError::NotFound(format!(
                    "'{segment}' below file {}",
                    current.id
                )));
            }
            let child_id = self
                .metadata()
                .child(&current.space_id, &current.id, segment)?
                .ok_or_else(|| {
                    DfsError::NotFound(format!("'{segment}' in {}/{}", current.space_id, current.id))
                })?;
            let child = self.node_from_id(&current.space_id, &child_id)?;
            visitor(segment, &child)?;
            current = child;
        }
        Ok(current)
    }

    /// Fails with `NotFound` if `node` or one of its ancestors is trashed.
    fn ensure_active(&self, node: &Node) -> DfsResult<()> {
        let mut seen = HashSet::new();
        let mut current = node.clone();
        loop {
            if current.is_trashed() {
                return Err(DfsError::NotFound(format!(
                    "{} is in the trash-bin",
                    node.id
                )));
            }
            if !seen.insert(current.id.clone()) {
                return Err(DfsError::Corrupt(format!(
                    "parent cycle above node {}",
                    node.id
                )));
            }
            let Some(parent_id) = &current.parent_id else {
                return Ok(());
            };
            current = self.node_from_id(&current.space_id, parent_id)?;
        }
    }

    /// Trashed nodes and their descendants are only reachable through the
    /// trash-bin.
    fn node_from_resource(&self, reference: &Reference) -> DfsResult<Node> {
        let start = match &reference.node_id {
            Some(id) => {
                let start = self.node_from_id(&reference.space_id, id)?;
                self.ensure_active(&start)
                    .map_err(|e| match e {
                        DfsError::NotFound(_) => DfsError::NotFound(format!("{reference}")),
                        e => e,
                    })?;
                start
            }
            None => self.node_from_space_id(&reference.space_id)?,
        };
        self.walk_path(&start, &reference.path, &mut |_, _| Ok(()))
    }

    /// Splits a reference for a node that is about to be created into its
    /// existing parent container and the new name.
    fn resolve_parent(&self, reference: &Reference) -> DfsResult<(Node, String)> {
        let segments = path_segments(&reference.path)?;
        let Some((name, parent_segments)) = segments.split_last() else {
            return Err(DfsError::InvalidArgument(format!(
                "reference {reference} does not name a child"
            )));
        };
        let parent_ref = Reference {
            space_id: reference.space_id.clone(),
            node_id: reference.node_id.clone(),
            path: parent_segments.join("/"),
        };
        let parent = self.node_from_resource(&parent_ref)?;
        if !parent.is_dir() {
            return Err(DfsError::InvalidArgument(format!(
                "parent of {reference} is not a container"
            )));
        }
        Ok((parent, name.to_string()))
    }

    /// Space-relative path of `node`, e.g. `/docs/a.txt`. Results are
    /// cached in the id cache.
    fn path(&self, node: &Node) -> DfsResult<String> {
        let Some(parent_id) = &node.parent_id else {
            return Ok("/".to_string());
        };
        if let Some(path) = self.id_cache().get(&node.space_id, &node.id) {
            return Ok(path);
        }
        let parent = self.node_from_id(&node.space_id, parent_id)?;
        let path = join_path(&self.path(&parent)?, &node.name);
        if let Err(e) = self.id_cache().set(&node.space_id, &node.id, &path) {
            warn!(space = %node.space_id, node = %node.id, error = %e, "failed to cache node path");
        }
        Ok(path)
    }
}

/// The default lookup: a metadata backend plus an id cache.
#[derive(Debug)]
pub struct Lookup {
    metadata: Arc<dyn MetadataBackend>,
    id_cache: IdCache,
}

impl Lookup {
    pub fn new(metadata: Arc<dyn MetadataBackend>, id_cache: IdCache) -> Self {
        Self { metadata, id_cache }
    }
}

impl PathLookup for Lookup {
    fn metadata(&self) -> &dyn MetadataBackend {
        self.metadata.as_ref()
    }

    fn id_cache(&self) -> &IdCache {
        &self.id_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::{ErrorKind, Timestamp, TrashInfo};
    use dfs_metadata_memory::MemoryMetadataBackend;

    struct Fixture {
        lookup: Lookup,
        space: SpaceId,
        docs: Node,
        file: Node,
    }

    fn fixture() -> Fixture {
        let metadata = Arc::new(MemoryMetadataBackend::new());
        let space = SpaceId::new("space1").unwrap();
        let root = Node::space_root(space.clone(), None);
        let docs = Node::new_container(
            space.clone(),
            NodeId::new("docs").unwrap(),
            Some(root.id.clone()),
            "docs",
        );
        let file = Node::new_file(space.clone(), NodeId::new("f1").unwrap(), docs.id.clone(), "a.txt");
        for node in [&root, &docs, &file] {
            metadata.write_node(node).unwrap();
        }
        metadata.link_child(&space, &root.id, "docs", &docs.id).unwrap();
        metadata.link_child(&space, &docs.id, "a.txt", &file.id).unwrap();

        Fixture {
            lookup: Lookup::new(metadata, IdCache::in_memory(None, None)),
            space,
            docs,
            file,
        }
    }

    #[test]
    fn resolves_paths_from_root_and_from_nodes() {
        let f = fixture();
        let by_path = f
            .lookup
            .node_from_resource(&Reference::path(f.space.clone(), "/docs/a.txt"))
            .unwrap();
        assert_eq!(by_path.id, f.file.id);

        let relative = Reference {
            space_id: f.space.clone(),
            node_id: Some(f.docs.id.clone()),
            path: "a.txt".into(),
        };
        assert_eq!(f.lookup.node_from_resource(&relative).unwrap().id, f.file.id);

        let missing = Reference::path(f.space.clone(), "/docs/b.txt");
        assert_eq!(
            f.lookup.node_from_resource(&missing).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn descendants_of_trashed_nodes_are_not_addressable_by_id() {
        let f = fixture();
        let mut docs = f.docs.clone();
        docs.trashed = Some(TrashInfo {
            origin: "/docs".into(),
            deleted_at: Timestamp::now(),
        });
        f.lookup.metadata().write_node(&docs).unwrap();

        for reference in [
            Reference::node(f.space.clone(), f.file.id.clone()),
            Reference::node(f.space.clone(), f.docs.id.clone()),
        ] {
            assert_eq!(
                f.lookup.node_from_resource(&reference).unwrap_err().kind(),
                ErrorKind::NotFound
            );
        }
        let below = Reference::node(f.space.clone(), f.file.id.clone()).join("x");
        assert!(f.lookup.resolve_parent(&below).is_err());
    }

    #[test]
    fn walk_visits_every_segment() {
        let f = fixture();
        let root = f.lookup.node_from_space_id(&f.space).unwrap();
        let mut seen = Vec::new();
        f.lookup
            .walk_path(&root, "docs/a.txt", &mut |name, node| {
                seen.push((name.to_string(), node.id.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("docs".to_string(), f.docs.id.clone()),
                ("a.txt".to_string(), f.file.id.clone())
            ]
        );
    }

    #[test]
    fn resolve_parent_requires_a_container() {
        let f = fixture();
        let (parent, name) = f
            .lookup
            .resolve_parent(&Reference::path(f.space.clone(), "/docs/new.txt"))
            .unwrap();
        assert_eq!((parent.id, name.as_str()), (f.docs.id.clone(), "new.txt"));

        let under_file = Reference::path(f.space.clone(), "/docs/a.txt/x");
        assert_eq!(
            f.lookup.resolve_parent(&under_file).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            f.lookup
                .resolve_parent(&Reference::space(f.space.clone()))
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn paths_are_computed_and_cached() {
        let f = fixture();
        assert_eq!(f.lookup.path(&f.file).unwrap(), "/docs/a.txt");
        assert_eq!(
            f.lookup.id_cache().get(&f.space, &f.file.id).as_deref(),
            Some("/docs/a.txt")
        );
        let root = f.lookup.node_from_space_id(&f.space).unwrap();
        assert_eq!(f.lookup.path(&root).unwrap(), "/");
    }
}
