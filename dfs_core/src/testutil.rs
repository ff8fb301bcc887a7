//! Conformance suites for `Blobstore` and `MetadataBackend` implementations.
//!
//! # Usage
//!
//! In your backend crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! dfs_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use dfs_core::testutil::BlobstoreTests;
//!
//! #[test]
//! fn test_my_blobstore() {
//!     let store = MyBlobstore::new(...);
//!     BlobstoreTests::new(&store).run_all().unwrap();
//! }
//! ```

use crate::blobstore::Blobstore;
use crate::error::{DfsResult, ErrorKind};
use crate::id::{BlobId, NodeId, SpaceId};
use crate::metadata::{MetadataBackend, TrashRecord};
use crate::node::{Node, Timestamp};
use rand::Rng;
use std::io::Read;
use std::path::PathBuf;
use tempfile::TempDir;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random()).collect()
}

fn random_space() -> SpaceId {
    SpaceId::new(format!("test-space-{}", rand::rng().random::<u32>()))
        .expect("generated space id is valid")
}

/// Test suite for `Blobstore` implementations.
pub struct BlobstoreTests<'a, B> {
    store: &'a B,
    space: SpaceId,
    scratch: TempDir,
    retaining: bool,
}

impl<'a, B: Blobstore> BlobstoreTests<'a, B> {
    pub fn new(store: &'a B) -> Self {
        Self {
            store,
            space: random_space(),
            scratch: TempDir::new().expect("create scratch dir"),
            retaining: false,
        }
    }

    /// For stores that keep blobs on delete.
    pub fn retaining(mut self) -> Self {
        self.retaining = true;
        self
    }

    fn node(&self) -> Node {
        let mut node = Node::new_file(
            self.space.clone(),
            NodeId::generate(),
            NodeId::space_root(&self.space),
            "blob.bin",
        );
        node.blob_id = Some(BlobId::generate());
        node
    }

    fn source(&self, data: &[u8]) -> PathBuf {
        let path = self
            .scratch
            .path()
            .join(format!("src-{}", rand::rng().random::<u64>()));
        std::fs::write(&path, data).expect("write source file");
        path
    }

    fn read_all(&self, node: &Node) -> DfsResult<Vec<u8>> {
        let mut reader = self.store.download(node)?;
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .map_err(|e| crate::DfsError::io("read blob", e))?;
        Ok(out)
    }

    pub fn run_all(&self) -> DfsResult<()> {
        self.test_roundtrip_sizes()?;
        self.test_missing_blob()?;
        self.test_overwrite()?;
        self.test_delete()?;
        self.test_node_without_blob_id()?;
        Ok(())
    }

    /// Empty, one byte and multi-megabyte content survive unchanged.
    pub fn test_roundtrip_sizes(&self) -> DfsResult<()> {
        for len in [0usize, 1, 3 * 1024 * 1024 + 17] {
            let data = random_bytes(len);
            let node = self.node();
            self.store.upload(&node, &self.source(&data))?;
            let read = self.read_all(&node)?;
            assert_eq!(read.len(), len, "blob length should match for {len} bytes");
            assert!(read == data, "blob content should match for {len} bytes");
        }
        Ok(())
    }

    pub fn test_missing_blob(&self) -> DfsResult<()> {
        let node = self.node();
        let err = self
            .store
            .download(&node)
            .err()
            .expect("downloading a missing blob should fail");
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
        Ok(())
    }

    pub fn test_overwrite(&self) -> DfsResult<()> {
        let node = self.node();
        self.store.upload(&node, &self.source(b"first version"))?;
        self.store.upload(&node, &self.source(b"second"))?;
        assert_eq!(self.read_all(&node)?, b"second");
        Ok(())
    }

    /// Delete removes the blob (or keeps it for retaining stores) and is
    /// idempotent.
    pub fn test_delete(&self) -> DfsResult<()> {
        let node = self.node();
        self.store.upload(&node, &self.source(b"to be deleted"))?;
        self.store.delete(&node)?;
        if self.retaining {
            assert_eq!(self.read_all(&node)?, b"to be deleted");
        } else {
            let err = self.store.download(&node).err().expect("blob should be gone");
            assert_eq!(err.kind(), ErrorKind::BlobNotFound);
        }
        self.store.delete(&node)?;
        Ok(())
    }

    pub fn test_node_without_blob_id(&self) -> DfsResult<()> {
        let mut node = self.node();
        node.blob_id = None;
        let src = self.source(b"x");
        for err in [
            self.store.upload(&node, &src).err(),
            self.store.download(&node).err(),
            self.store.delete(&node).err(),
        ] {
            let err = err.expect("operation without blob id should fail");
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        Ok(())
    }
}

/// Test suite for `MetadataBackend` implementations.
pub struct MetadataBackendTests<'a, M> {
    backend: &'a M,
    space: SpaceId,
}

impl<'a, M: MetadataBackend> MetadataBackendTests<'a, M> {
    pub fn new(backend: &'a M) -> Self {
        Self {
            backend,
            space: random_space(),
        }
    }

    fn root(&self) -> Node {
        Node::space_root(self.space.clone(), None)
    }

    pub fn run_all(&self) -> DfsResult<()> {
        self.backend.setup()?;
        self.backend.write_node(&self.root())?;
        self.test_node_roundtrip()?;
        self.test_missing_node()?;
        self.test_child_index()?;
        self.test_purge_retires_id()?;
        self.test_trash_records()?;
        self.test_list_spaces()?;
        Ok(())
    }

    pub fn test_node_roundtrip(&self) -> DfsResult<()> {
        let root = self.root();
        let mut node = Node::new_file(self.space.clone(), NodeId::generate(), root.id, "a.txt");
        node.blob_size = 9;
        self.backend.write_node(&node)?;
        assert_eq!(self.backend.read_node(&self.space, &node.id)?, node);

        node.name = "b.txt".into();
        self.backend.write_node(&node)?;
        assert_eq!(self.backend.read_node(&self.space, &node.id)?.name, "b.txt");
        Ok(())
    }

    pub fn test_missing_node(&self) -> DfsResult<()> {
        let err = self
            .backend
            .read_node(&self.space, &NodeId::generate())
            .expect_err("unknown node should not be found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    pub fn test_child_index(&self) -> DfsResult<()> {
        let parent = NodeId::generate();
        let (a, b) = (NodeId::generate(), NodeId::generate());

        self.backend.link_child(&self.space, &parent, "b", &b)?;
        self.backend.link_child(&self.space, &parent, "a", &a)?;
        let err = self
            .backend
            .link_child(&self.space, &parent, "a", &b)
            .expect_err("linking a taken name should fail");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        assert_eq!(self.backend.child(&self.space, &parent, "a")?, Some(a.clone()));
        assert_eq!(
            self.backend.children(&self.space, &parent)?,
            vec![("a".to_string(), a), ("b".to_string(), b.clone())]
        );

        self.backend.unlink_child(&self.space, &parent, "a")?;
        self.backend.unlink_child(&self.space, &parent, "a")?;
        assert_eq!(self.backend.child(&self.space, &parent, "a")?, None);
        assert_eq!(
            self.backend.children(&self.space, &parent)?,
            vec![("b".to_string(), b)]
        );
        Ok(())
    }

    pub fn test_purge_retires_id(&self) -> DfsResult<()> {
        let node = Node::new_container(
            self.space.clone(),
            NodeId::generate(),
            Some(self.root().id),
            "dir",
        );
        assert!(!self.backend.id_in_use(&self.space, &node.id)?);
        self.backend.write_node(&node)?;
        assert!(self.backend.id_in_use(&self.space, &node.id)?);

        self.backend.purge_node(&self.space, &node.id)?;
        let err = self
            .backend
            .read_node(&self.space, &node.id)
            .expect_err("purged node should be gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(
            self.backend.id_in_use(&self.space, &node.id)?,
            "purged ids stay retired"
        );
        Ok(())
    }

    pub fn test_trash_records(&self) -> DfsResult<()> {
        let node_id = NodeId::generate();
        let record = TrashRecord {
            key: node_id.to_string(),
            space_id: self.space.clone(),
            node_id,
            origin: "/docs/a.txt".into(),
            deleted_at: Timestamp::now(),
        };
        self.backend.write_trash(&record)?;
        assert_eq!(self.backend.read_trash(&self.space, &record.key)?, record);
        assert!(self.backend.list_trash(&self.space)?.contains(&record));

        self.backend.remove_trash(&self.space, &record.key)?;
        self.backend.remove_trash(&self.space, &record.key)?;
        let err = self
            .backend
            .read_trash(&self.space, &record.key)
            .expect_err("removed trash record should be gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!self.backend.list_trash(&self.space)?.contains(&record));
        Ok(())
    }

    pub fn test_list_spaces(&self) -> DfsResult<()> {
        assert!(self.backend.list_spaces()?.contains(&self.space));
        Ok(())
    }
}
