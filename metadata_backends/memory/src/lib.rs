use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use dfs_core::{DfsError, DfsResult, MetadataBackend, Node, NodeId, SpaceId, TrashRecord};
use std::collections::BTreeMap;
use tracing::debug;

type NodeKey = (SpaceId, NodeId);

/// Keeps all metadata in process memory. Useful for tests and ephemeral
/// engines.
#[derive(Debug, Default)]
pub struct MemoryMetadataBackend {
    nodes: DashMap<NodeKey, Node>,
    children: DashMap<NodeKey, BTreeMap<String, NodeId>>,
    retired: DashSet<NodeKey>,
    trash: DashMap<(SpaceId, String), TrashRecord>,
}

impl MemoryMetadataBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(space_id: &SpaceId, id: &NodeId) -> NodeKey {
    (space_id.clone(), id.clone())
}

impl MetadataBackend for MemoryMetadataBackend {
    fn setup(&self) -> DfsResult<()> {
        Ok(())
    }

    fn list_spaces(&self) -> DfsResult<Vec<SpaceId>> {
        let mut spaces: Vec<SpaceId> = self
            .nodes
            .iter()
            .filter(|e| e.value().is_space_root())
            .map(|e| e.key().0.clone())
            .collect();
        spaces.sort();
        Ok(spaces)
    }

    fn read_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<Node> {
        self.nodes
            .get(&key(space_id, id))
            .map(|n| n.value().clone())
            .ok_or_else(|| DfsError::NotFound(format!("node {space_id}/{id}")))
    }

    fn write_node(&self, node: &Node) -> DfsResult<()> {
        self.nodes
            .insert(key(&node.space_id, &node.id), node.clone());
        Ok(())
    }

    fn purge_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<()> {
        let k = key(space_id, id);
        self.retired.insert(k.clone());
        self.nodes.remove(&k);
        self.children.remove(&k);
        debug!(space = %space_id, node = %id, "purged node");
        Ok(())
    }

    fn id_in_use(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<bool> {
        let k = key(space_id, id);
        Ok(self.nodes.contains_key(&k) || self.retired.contains(&k))
    }

    fn link_child(
        &self,
        space_id: &SpaceId,
        parent: &NodeId,
        name: &str,
        child: &NodeId,
    ) -> DfsResult<()> {
        // the entry guard locks the parent's shard for the check and insert
        let mut children = self.children.entry(key(space_id, parent)).or_default();
        if children.contains_key(name) {
            return Err(DfsError::AlreadyExists(format!(
                "'{name}' in {space_id}/{parent}"
            )));
        }
        children.insert(name.to_string(), child.clone());
        Ok(())
    }

    fn unlink_child(&self, space_id: &SpaceId, parent: &NodeId, name: &str) -> DfsResult<()> {
        if let Entry::Occupied(mut children) = self.children.entry(key(space_id, parent)) {
            children.get_mut().remove(name);
        }
        Ok(())
    }

    fn child(
        &self,
        space_id: &SpaceId,
        parent: &NodeId,
        name: &str,
    ) -> DfsResult<Option<NodeId>> {
        Ok(self
            .children
            .get(&key(space_id, parent))
            .and_then(|c| c.get(name).cloned()))
    }

    fn children(&self, space_id: &SpaceId, parent: &NodeId) -> DfsResult<Vec<(String, NodeId)>> {
        Ok(self
            .children
            .get(&key(space_id, parent))
            .map(|c| c.iter().map(|(n, id)| (n.clone(), id.clone())).collect())
            .unwrap_or_default())
    }

    fn write_trash(&self, record: &TrashRecord) -> DfsResult<()> {
        self.trash.insert(
            (record.space_id.clone(), record.key.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn read_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<TrashRecord> {
        self.trash
            .get(&(space_id.clone(), key.to_string()))
            .map(|r| r.value().clone())
            .ok_or_else(|| DfsError::NotFound(format!("trash item {key} in space {space_id}")))
    }

    fn remove_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<()> {
        self.trash.remove(&(space_id.clone(), key.to_string()));
        Ok(())
    }

    fn list_trash(&self, space_id: &SpaceId) -> DfsResult<Vec<TrashRecord>> {
        let mut records: Vec<TrashRecord> = self
            .trash
            .iter()
            .filter(|e| &e.key().0 == space_id)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at).then(a.key.cmp(&b.key)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::testutil::MetadataBackendTests;

    #[test]
    fn test_memory_metadata_backend() {
        let backend = MemoryMetadataBackend::new();
        MetadataBackendTests::new(&backend).run_all().unwrap();
    }
}
