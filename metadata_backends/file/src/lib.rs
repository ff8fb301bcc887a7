//! Metadata backend storing one CBOR file per node.
//!
//! Layout below `<root>/spaces/<space id>/`:
//!
//! ```text
//! nodes/<id split into 4 levels>.node       node record
//! nodes/<id split into 4 levels>.children/  one file per child name, holding the child id
//! nodes/<id split into 4 levels>.retired    marker left behind by a purge
//! trash/<key>.trash                         trash record
//! tmp/                                      staging area for atomic writes
//! ```
//!
//! Decoded node records are cached and only re-read when the file's mtime
//! moves forward, so other processes sharing the directory are picked up.

use dfs_core::error::IoResultExt;
use dfs_core::id::pathify;
use dfs_core::mtimesync::Cache;
use dfs_core::{DfsError, DfsResult, MetadataBackend, Node, NodeId, SpaceId, TrashRecord};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const NODE_SUFFIX: &str = "node";
const CHILDREN_SUFFIX: &str = "children";
const RETIRED_SUFFIX: &str = "retired";
const TRASH_SUFFIX: &str = ".trash";

#[derive(Debug)]
pub struct FileMetadataBackend {
    root: PathBuf,
    nodes: Cache<PathBuf, Node>,
}

impl FileMetadataBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            nodes: Cache::new(),
        }
    }

    fn spaces_dir(&self) -> PathBuf {
        self.root.join("spaces")
    }

    fn space_dir(&self, space_id: &SpaceId) -> PathBuf {
        self.spaces_dir().join(space_id.as_str())
    }

    fn node_base(&self, space_id: &SpaceId, id: &NodeId) -> PathBuf {
        self.space_dir(space_id)
            .join("nodes")
            .join(pathify(id.as_str(), 4, 2))
    }

    pub fn node_path(&self, space_id: &SpaceId, id: &NodeId) -> PathBuf {
        with_suffix(self.node_base(space_id, id), NODE_SUFFIX)
    }

    fn children_dir(&self, space_id: &SpaceId, id: &NodeId) -> PathBuf {
        with_suffix(self.node_base(space_id, id), CHILDREN_SUFFIX)
    }

    fn retired_path(&self, space_id: &SpaceId, id: &NodeId) -> PathBuf {
        with_suffix(self.node_base(space_id, id), RETIRED_SUFFIX)
    }

    fn trash_dir(&self, space_id: &SpaceId) -> PathBuf {
        self.space_dir(space_id).join("trash")
    }

    fn trash_path(&self, space_id: &SpaceId, key: &str) -> DfsResult<PathBuf> {
        // keys are node ids; this also keeps them from escaping the trash dir
        let key = NodeId::new(key)?;
        Ok(self
            .trash_dir(space_id)
            .join(format!("{key}{TRASH_SUFFIX}")))
    }

    fn tmp_dir(&self, space_id: &SpaceId) -> DfsResult<PathBuf> {
        let dir = self.space_dir(space_id).join("tmp");
        std::fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    /// Writes `bytes` to `dest` via a staged temp file and a rename.
    fn write_atomic(&self, space_id: &SpaceId, dest: &Path, bytes: &[u8]) -> DfsResult<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("create {}", parent.display()))?;
        }
        let mut tmp = tempfile::NamedTempFile::new_in(self.tmp_dir(space_id)?)
            .io_context(|| "create temp file")?;
        tmp.write_all(bytes)
            .io_context(|| format!("stage {}", dest.display()))?;
        tmp.as_file()
            .sync_all()
            .io_context(|| format!("sync {}", dest.display()))?;
        tmp.persist(dest)
            .map_err(|e| DfsError::io(format!("persist {}", dest.display()), e.error))?;
        Ok(())
    }
}

// ids may contain dots, so suffixes are appended rather than swapped in
fn with_suffix(base: PathBuf, suffix: &str) -> PathBuf {
    let mut path = base.into_os_string();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

fn remove_if_present(path: &Path) -> DfsResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DfsError::io(format!("remove {}", path.display()), e)),
    }
}

impl MetadataBackend for FileMetadataBackend {
    fn setup(&self) -> DfsResult<()> {
        let dir = self.spaces_dir();
        std::fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))
    }

    fn list_spaces(&self) -> DfsResult<Vec<SpaceId>> {
        let dir = self.spaces_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DfsError::io(format!("list {}", dir.display()), e)),
        };
        let mut spaces = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("list {}", dir.display()))?;
            let Ok(space_id) = SpaceId::new(entry.file_name().to_string_lossy()) else {
                continue;
            };
            if self
                .node_path(&space_id, &NodeId::space_root(&space_id))
                .exists()
            {
                spaces.push(space_id);
            }
        }
        spaces.sort();
        Ok(spaces)
    }

    fn read_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<Node> {
        let path = self.node_path(space_id, id);
        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DfsError::NotFound(format!("node {space_id}/{id}")));
            }
            Err(e) => return Err(DfsError::io(format!("stat {}", path.display()), e)),
        };
        self.nodes.load_or_store(path.clone(), mtime, || {
            debug!(path = %path.display(), "decoding node");
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                // purged between stat and read
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(DfsError::NotFound(format!("node {space_id}/{id}")));
                }
                Err(e) => return Err(DfsError::io(format!("read {}", path.display()), e)),
            };
            Node::from_bytes(&bytes)
        })
    }

    fn write_node(&self, node: &Node) -> DfsResult<()> {
        let path = self.node_path(&node.space_id, &node.id);
        self.write_atomic(&node.space_id, &path, &node.to_bytes()?)?;
        // coarse mtimes may not advance between two writes
        self.nodes.remove(&path);
        Ok(())
    }

    fn purge_node(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<()> {
        let retired = self.retired_path(space_id, id);
        if let Some(parent) = retired.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::File::create(&retired).io_context(|| format!("retire {}", retired.display()))?;

        let path = self.node_path(space_id, id);
        remove_if_present(&path)?;
        self.nodes.remove(&path);

        let children = self.children_dir(space_id, id);
        match std::fs::remove_dir_all(&children) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DfsError::io(format!("remove {}", children.display()), e)),
        }
        Ok(())
    }

    fn id_in_use(&self, space_id: &SpaceId, id: &NodeId) -> DfsResult<bool> {
        Ok(self.node_path(space_id, id).exists() || self.retired_path(space_id, id).exists())
    }

    fn link_child(
        &self,
        space_id: &SpaceId,
        parent: &NodeId,
        name: &str,
        child: &NodeId,
    ) -> DfsResult<()> {
        let dir = self.children_dir(space_id, parent);
        std::fs::create_dir_all(&dir).io_context(|| format!("create {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.tmp_dir(space_id)?)
            .io_context(|| "create temp file")?;
        tmp.write_all(child.as_str().as_bytes())
            .io_context(|| "stage child link")?;

        // hard_link fails if the name is taken, unlike rename
        let link = dir.join(name);
        match std::fs::hard_link(tmp.path(), &link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(DfsError::AlreadyExists(
                format!("'{name}' in {space_id}/{parent}"),
            )),
            Err(e) => Err(DfsError::io(format!("link {}", link.display()), e)),
        }
    }

    fn unlink_child(&self, space_id: &SpaceId, parent: &NodeId, name: &str) -> DfsResult<()> {
        remove_if_present(&self.children_dir(space_id, parent).join(name))
    }

    fn child(
        &self,
        space_id: &SpaceId,
        parent: &NodeId,
        name: &str,
    ) -> DfsResult<Option<NodeId>> {
        let path = self.children_dir(space_id, parent).join(name);
        match std::fs::read_to_string(&path) {
            Ok(id) => Ok(Some(NodeId::new(id.trim()).map_err(|_| {
                DfsError::Corrupt(format!("bad child link {}", path.display()))
            })?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DfsError::io(format!("read {}", path.display()), e)),
        }
    }

    fn children(&self, space_id: &SpaceId, parent: &NodeId) -> DfsResult<Vec<(String, NodeId)>> {
        let dir = self.children_dir(space_id, parent);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DfsError::io(format!("list {}", dir.display()), e)),
        };
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("list {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // unlinked concurrently
            if let Some(id) = self.child(space_id, parent, &name)? {
                children.push((name, id));
            }
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    fn write_trash(&self, record: &TrashRecord) -> DfsResult<()> {
        let path = self.trash_path(&record.space_id, &record.key)?;
        self.write_atomic(&record.space_id, &path, &record.to_bytes()?)
    }

    fn read_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<TrashRecord> {
        let path = self.trash_path(space_id, key)?;
        match std::fs::read(&path) {
            Ok(bytes) => TrashRecord::from_bytes(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DfsError::NotFound(format!(
                "trash item {key} in space {space_id}"
            ))),
            Err(e) => Err(DfsError::io(format!("read {}", path.display()), e)),
        }
    }

    fn remove_trash(&self, space_id: &SpaceId, key: &str) -> DfsResult<()> {
        remove_if_present(&self.trash_path(space_id, key)?)
    }

    fn list_trash(&self, space_id: &SpaceId) -> DfsResult<Vec<TrashRecord>> {
        let dir = self.trash_dir(space_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DfsError::io(format!("list {}", dir.display()), e)),
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("list {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = name.strip_suffix(TRASH_SUFFIX) else {
                continue;
            };
            match self.read_trash(space_id, key) {
                Ok(record) => records.push(record),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(space = %space_id, key, error = %e, "skipping unreadable trash record"),
            }
        }
        records.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at).then(a.key.cmp(&b.key)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::testutil::MetadataBackendTests;
    use std::sync::{Arc, Barrier};
    use std::time::{Duration, SystemTime};

    fn space() -> SpaceId {
        SpaceId::new("space1").unwrap()
    }

    #[test]
    fn test_file_metadata_backend() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FileMetadataBackend::new(temp_dir.path());
        MetadataBackendTests::new(&backend).run_all().unwrap();
    }

    #[test]
    fn decoded_nodes_are_cached_per_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FileMetadataBackend::new(temp_dir.path());
        backend.setup().unwrap();
        let root = Node::space_root(space(), None);
        backend.write_node(&root).unwrap();

        backend.read_node(&space(), &root.id).unwrap();
        backend.read_node(&space(), &root.id).unwrap();
        assert_eq!(backend.nodes.len(), 1);
    }

    #[test]
    fn newer_files_from_other_writers_are_picked_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = FileMetadataBackend::new(temp_dir.path());
        let reader = FileMetadataBackend::new(temp_dir.path());
        writer.setup().unwrap();

        let mut node = Node::new_file(
            space(),
            NodeId::new("file1").unwrap(),
            NodeId::space_root(&space()),
            "before.txt",
        );
        writer.write_node(&node).unwrap();
        assert_eq!(reader.read_node(&space(), &node.id).unwrap().name, "before.txt");

        node.name = "after.txt".into();
        writer.write_node(&node).unwrap();
        let path = writer.node_path(&space(), &node.id);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        assert_eq!(reader.read_node(&space(), &node.id).unwrap().name, "after.txt");
    }

    #[test]
    fn concurrent_links_of_one_name_admit_one() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileMetadataBackend::new(temp_dir.path()));
        backend.setup().unwrap();
        let parent = NodeId::new("parent").unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                let parent = parent.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    backend.link_child(&space(), &parent, "same", &NodeId::generate())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| {
            e.kind() == dfs_core::ErrorKind::AlreadyExists
        }));
    }

    #[test]
    fn trash_keys_cannot_escape() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FileMetadataBackend::new(temp_dir.path());
        let err = backend.read_trash(&space(), "../../etc").unwrap_err();
        assert_eq!(err.kind(), dfs_core::ErrorKind::InvalidArgument);
    }
}
