//! Trash-bin lifecycle through the engine facade:
//! active -> trashed -> restored or purged.

use dfs_blobstore_memory::MemoryBlobstore;
use dfs_core::{
    BlobReader, Blobstore, DfsError, DfsResult, ErrorKind, IdCache, Node, NoopSink, NullMapper,
    Reference, RequestContext, SpaceId, StaticPermissions, User,
};
use dfs_fs::{Aspects, Decomposedfs, Lookup, Options, PathLookup, RestoreConflict};
use dfs_metadata_memory::MemoryMetadataBackend;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Memory blobstore whose deletes fail for nodes named `stuck.txt`.
#[derive(Debug, Default)]
struct StickyBlobstore {
    inner: MemoryBlobstore,
}

impl Blobstore for StickyBlobstore {
    fn upload(&self, node: &Node, source: &Path) -> DfsResult<()> {
        self.inner.upload(node, source)
    }

    fn download(&self, node: &Node) -> DfsResult<BlobReader> {
        self.inner.download(node)
    }

    fn delete(&self, node: &Node) -> DfsResult<()> {
        if node.name == "stuck.txt" {
            return Err(DfsError::io(
                "delete blob",
                std::io::Error::other("device busy"),
            ));
        }
        self.inner.delete(node)
    }
}

struct Harness {
    fs: Decomposedfs,
    dir: TempDir,
    space: SpaceId,
    ctx: RequestContext,
}

async fn harness() -> Harness {
    harness_with(Options::default()).await
}

async fn harness_with(options: Options) -> Harness {
    let lookup: Arc<dyn PathLookup> = Arc::new(Lookup::new(
        Arc::new(MemoryMetadataBackend::new()),
        IdCache::in_memory(None, None),
    ));
    let aspects = Aspects::new(
        lookup,
        Arc::new(StickyBlobstore::default()),
        Arc::new(StaticPermissions::allow_all()),
        Arc::new(NullMapper::new()),
        Arc::new(NoopSink),
        options,
    );
    let fs = Decomposedfs::open(aspects).await.expect("engine should open");
    let ctx = RequestContext::for_user(User::new("alice"));
    let space = SpaceId::new("space1").unwrap();
    fs.create_space(&ctx, &space, &User::new("alice")).await.unwrap();
    Harness {
        fs,
        dir: tempfile::tempdir().unwrap(),
        space,
        ctx,
    }
}

impl Harness {
    fn at(&self, path: &str) -> Reference {
        Reference::path(self.space.clone(), path)
    }

    fn space_ref(&self) -> Reference {
        Reference::space(self.space.clone())
    }

    async fn put(&self, path: &str, content: &[u8]) -> Node {
        let source: PathBuf = self.dir.path().join(source_name(path));
        std::fs::write(&source, content).unwrap();
        self.fs.upload(&self.ctx, &self.at(path), source).await.unwrap()
    }

    async fn read(&self, path: &str) -> Vec<u8> {
        let (_, mut reader) = self.fs.download(&self.ctx, &self.at(path)).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    async fn names(&self, path: &str) -> Vec<String> {
        self.fs
            .list_folder(&self.ctx, &self.at(path))
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect()
    }
}

fn source_name(path: &str) -> String {
    path.replace('/', "_")
}

#[tokio::test]
async fn delete_restore_purge() {
    let h = harness().await;
    let file = h.put("/a.txt", b"hello").await;

    // --- trash ---
    let record = h.fs.delete(&h.ctx, &h.at("/a.txt")).await.unwrap();
    assert!(h.names("/").await.is_empty());
    let listing = h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), "", "")
        .await
        .unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].key, record.key);
    assert_eq!(listing[0].reference.path, "/a.txt");
    assert_eq!(listing[0].size, 5);

    // --- restore somewhere else ---
    let restored = h
        .fs
        .restore_recycle_item(&h.ctx, &h.space_ref(), &record.key, "", Some(&h.at("/b.txt")))
        .await
        .unwrap();
    assert_eq!(restored.id, file.id);
    assert_eq!(restored.blob_id, file.blob_id);
    assert_eq!(h.read("/b.txt").await, b"hello");
    assert!(h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), "", "")
        .await
        .unwrap()
        .is_empty());

    // --- trash again and purge ---
    let record = h.fs.delete(&h.ctx, &h.at("/b.txt")).await.unwrap();
    h.fs.purge_recycle_item(&h.ctx, &h.space_ref(), &record.key, "")
        .await
        .unwrap();
    let err = h
        .fs
        .restore_recycle_item(&h.ctx, &h.space_ref(), &record.key, "", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // ids of purged nodes are never handed out again
    let metadata = h.fs.aspects().lookup.metadata();
    assert!(metadata.id_in_use(&h.space, &file.id).unwrap());
}

#[tokio::test]
async fn trashed_directories_keep_their_contents() {
    let h = harness().await;
    h.fs.create_dir(&h.ctx, &h.at("/dir")).await.unwrap();
    h.fs.create_dir(&h.ctx, &h.at("/dir/sub")).await.unwrap();
    h.put("/dir/sub/deep.txt", b"deep").await;
    h.put("/dir/top.txt", b"top").await;

    let record = h.fs.delete(&h.ctx, &h.at("/dir")).await.unwrap();
    let roots = h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), "", "")
        .await
        .unwrap();
    assert_eq!(roots[0].size, 7);

    let inside = h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), &record.key, "/sub")
        .await
        .unwrap();
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].relative_path, "/sub/deep.txt");
    assert_eq!(inside[0].reference.path, "/dir/sub/deep.txt");

    // restoring the whole directory brings the subtree back
    h.fs.restore_recycle_item(&h.ctx, &h.space_ref(), &record.key, "", None)
        .await
        .unwrap();
    assert_eq!(h.read("/dir/sub/deep.txt").await, b"deep");
    assert_eq!(h.names("/dir").await, vec!["sub", "top.txt"]);
}

#[tokio::test]
async fn empty_recycle_reports_failures_per_item() {
    let h = harness().await;
    h.put("/ok.txt", b"ok").await;
    h.put("/stuck.txt", b"stuck").await;
    h.put("/also-ok.txt", b"ok").await;
    let mut keys = Vec::new();
    for path in ["/ok.txt", "/stuck.txt", "/also-ok.txt"] {
        keys.push(h.fs.delete(&h.ctx, &h.at(path)).await.unwrap().key);
    }

    let report = h.fs.empty_recycle(&h.ctx, &h.space_ref()).await.unwrap();
    assert_eq!(report.purged.len(), 2);
    assert!(!report.purged.contains(&keys[1]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, keys[1]);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::IoFailure);

    let left = h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), "", "")
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key, keys[1]);
}

#[tokio::test]
async fn purge_expired_spares_recent_items() {
    let h = harness().await;
    h.put("/f.txt", b"f").await;
    h.fs.delete(&h.ctx, &h.at("/f.txt")).await.unwrap();

    let report = h
        .fs
        .purge_expired(&h.ctx, &h.space_ref(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(report.purged.is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = h
        .fs
        .purge_expired(&h.ctx, &h.space_ref(), Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(report.purged.len(), 1);
    assert!(report.is_complete());
}

#[tokio::test]
async fn restore_all_conflict_policies() {
    let h = harness().await;
    for content in [&b"one"[..], b"two", b"three"] {
        h.put("/report.tar.gz", content).await;
        h.fs.delete(&h.ctx, &h.at("/report.tar.gz")).await.unwrap();
    }
    h.put("/report.tar.gz", b"live").await;

    // skip leaves everything in the trash
    let report = h
        .fs
        .restore_all(&h.ctx, &h.space_ref(), RestoreConflict::Skip)
        .await
        .unwrap();
    assert_eq!(report.skipped.len(), 3);
    assert!(report.restored.is_empty());

    let report = h
        .fs
        .restore_all(&h.ctx, &h.space_ref(), RestoreConflict::KeepBoth)
        .await
        .unwrap();
    assert_eq!(report.restored.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(
        h.names("/").await,
        vec![
            "report (1).tar.gz",
            "report (2).tar.gz",
            "report (3).tar.gz",
            "report.tar.gz"
        ]
    );
    assert_eq!(h.read("/report.tar.gz").await, b"live");
}

#[tokio::test]
async fn restore_all_replace_trashes_the_occupant() {
    let h = harness().await;
    h.put("/a.txt", b"old").await;
    h.fs.delete(&h.ctx, &h.at("/a.txt")).await.unwrap();
    h.put("/a.txt", b"new").await;

    let report = h
        .fs
        .restore_all(&h.ctx, &h.space_ref(), RestoreConflict::Replace)
        .await
        .unwrap();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.restored[0].1.path, "/a.txt");
    assert_eq!(h.read("/a.txt").await, b"old");

    // the replaced file is now in the trash
    let trash = h
        .fs
        .list_recycle(&h.ctx, &h.space_ref(), "", "")
        .await
        .unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].size, 3);
}

#[tokio::test]
async fn descendants_of_trashed_directories_are_inactive() {
    let h = harness().await;
    h.fs.create_dir(&h.ctx, &h.at("/dir")).await.unwrap();
    let sub = h.fs.create_dir(&h.ctx, &h.at("/dir/sub")).await.unwrap();
    let file = h.put("/dir/sub/f.txt", b"x").await;
    h.fs.delete(&h.ctx, &h.at("/dir")).await.unwrap();

    let by_id = Reference::node(h.space.clone(), sub.id.clone());
    let file_by_id = Reference::node(h.space.clone(), file.id.clone());
    let err = h.fs.stat(&h.ctx, &by_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = h.fs.stat(&h.ctx, &file_by_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.fs.create_dir(&h.ctx, &by_id.join("new")).await.is_err());
    assert!(h.fs.delete(&h.ctx, &file_by_id).await.is_err());
    assert!(
        h.fs.move_node(&h.ctx, &file_by_id, &h.at("/escaped.txt"))
            .await
            .is_err()
    );

    let source = h.dir.path().join("upload.txt");
    std::fs::write(&source, b"y").unwrap();
    assert!(h.fs.upload(&h.ctx, &by_id.join("g.txt"), source).await.is_err());
    assert!(h.names("/").await.is_empty());
}

#[tokio::test]
async fn restoring_into_own_subtree_is_rejected() {
    let h = harness().await;
    h.fs.create_dir(&h.ctx, &h.at("/dir")).await.unwrap();
    let sub = h.fs.create_dir(&h.ctx, &h.at("/dir/sub")).await.unwrap();
    let record = h.fs.delete(&h.ctx, &h.at("/dir")).await.unwrap();

    let inside = Reference {
        space_id: h.space.clone(),
        node_id: Some(sub.id.clone()),
        path: "back".into(),
    };
    let err = h
        .fs
        .restore_recycle_item(&h.ctx, &h.space_ref(), &record.key, "", Some(&inside))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // still trashed and restorable to its origin
    assert_eq!(
        h.fs.list_recycle(&h.ctx, &h.space_ref(), "", "")
            .await
            .unwrap()
            .len(),
        1
    );
    h.fs.restore_recycle_item(&h.ctx, &h.space_ref(), &record.key, "", None)
        .await
        .unwrap();
    assert_eq!(h.names("/dir").await, vec!["sub".to_string()]);
}

#[tokio::test]
async fn keep_both_gives_up_after_the_configured_attempts() {
    let h = harness_with(Options {
        max_rename_attempts: 2,
        ..Options::default()
    })
    .await;
    h.put("/a.txt", b"trashed").await;
    let record = h.fs.delete(&h.ctx, &h.at("/a.txt")).await.unwrap();
    for name in ["/a.txt", "/a (1).txt", "/a (2).txt"] {
        h.put(name, b"live").await;
    }

    let report = h
        .fs
        .restore_all(&h.ctx, &h.space_ref(), RestoreConflict::KeepBoth)
        .await
        .unwrap();
    assert!(report.restored.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, record.key);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::AlreadyExists);

    let occupant = h.fs.delete(&h.ctx, &h.at("/a (2).txt")).await.unwrap();
    h.fs.purge_recycle_item(&h.ctx, &h.space_ref(), &occupant.key, "")
        .await
        .unwrap();
    let report = h
        .fs
        .restore_all(&h.ctx, &h.space_ref(), RestoreConflict::KeepBoth)
        .await
        .unwrap();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(h.read("/a (2).txt").await, b"trashed");
}
