//! Tree operations against the on-disk metadata backend, including
//! reopening the backend to check that state is persisted.

use dfs_blobstore_local::LocalBlobstore;
use dfs_core::{ErrorKind, IdCache, Node, NodeType, Reference, SpaceId};
use dfs_fs::{Lookup, PathLookup, Tree};
use dfs_metadata_file::FileMetadataBackend;
use std::path::Path;
use std::sync::Arc;

fn open_tree(root: &Path) -> Tree {
    let lookup = Arc::new(Lookup::new(
        Arc::new(FileMetadataBackend::new(root.join("metadata"))),
        IdCache::in_memory(None, None),
    ));
    let tree = Tree::new(lookup, Arc::new(LocalBlobstore::new(root.join("blobs"))));
    tree.setup().expect("setup should succeed");
    tree
}

fn space() -> SpaceId {
    SpaceId::new("space1").unwrap()
}

fn resolve(tree: &Tree, path: &str) -> Node {
    tree.lookup()
        .node_from_resource(&Reference::path(space(), path))
        .unwrap_or_else(|e| panic!("{path} should resolve: {e}"))
}

#[test]
fn state_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    {
        let tree = open_tree(dir.path());
        let root = tree.create_space(&space(), None).unwrap();
        let docs = tree.create(&root, "docs", NodeType::Container).unwrap();
        let file = tree.create(&docs, "a.txt", NodeType::File).unwrap();
        tree.move_node(&file, &root, "b.txt").unwrap();
        let trashed = tree.create(&root, "gone", NodeType::File).unwrap();
        tree.delete(&trashed).unwrap();
    }

    let tree = open_tree(dir.path());
    let file = resolve(&tree, "/b.txt");
    assert_eq!(file.name, "b.txt");
    assert_eq!(tree.lookup().path(&file).unwrap(), "/b.txt");
    let root = resolve(&tree, "/");
    let names: Vec<_> = tree.list(&root).unwrap().map(|n| n.unwrap().name).collect();
    assert_eq!(names, vec!["b.txt", "docs"]);

    let trash = tree.lookup().metadata().list_trash(&space()).unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].origin, "/gone");
}

#[test]
fn concurrent_creates_of_one_name_yield_one_success() {
    let dir = tempfile::tempdir().unwrap();
    let tree = Arc::new(open_tree(dir.path()));
    let root = tree.create_space(&space(), None).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tree = tree.clone();
            let root = root.clone();
            std::thread::spawn(move || tree.create(&root, "same", NodeType::File))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
    let names: Vec<_> = tree.list(&root).unwrap().map(|n| n.unwrap().name).collect();
    assert_eq!(names, vec!["same"]);
}

#[test]
fn purging_a_directory_removes_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let tree = open_tree(dir.path());
    let root = tree.create_space(&space(), None).unwrap();
    let folder = tree.create(&root, "folder", NodeType::Container).unwrap();
    let mut file = tree.create(&folder, "f", NodeType::File).unwrap();

    let source = dir.path().join("source");
    std::fs::write(&source, b"content").unwrap();
    file.blob_id = Some(dfs_core::BlobId::generate());
    file.blob_size = 7;
    tree.write_blob(&file, &source).unwrap();
    tree.lookup().metadata().write_node(&file).unwrap();
    assert_eq!(tree.tree_size(&folder).unwrap(), 7);

    let blobs = LocalBlobstore::new(dir.path().join("blobs"));
    assert_eq!(blobs.blob_ids(&space()).unwrap().len(), 1);

    tree.purge_subtree(&folder).unwrap();
    assert!(blobs.blob_ids(&space()).unwrap().is_empty());
    let err = tree
        .lookup()
        .node_from_id(&space(), &file.id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
