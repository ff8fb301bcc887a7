use dfs_core::blobstore::{BlobReader, Blobstore, require_blob_id};
use dfs_core::error::IoResultExt;
use dfs_core::id::pathify;
use dfs_core::{BlobId, DfsError, DfsResult, Node, SpaceId};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LocalBlobstoreConfig {
    pub root: PathBuf,
    /// Keep blobs when their node is purged, leaving them for an external
    /// garbage collector.
    #[serde(default)]
    pub retain_on_delete: bool,
}

/// Stores each blob as one file below
/// `<root>/spaces/<space>/blobs/<blob id split into 4 levels>`.
#[derive(Debug, Clone)]
pub struct LocalBlobstore {
    root: PathBuf,
    retain_on_delete: bool,
}

impl LocalBlobstore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBlobstore {
            root: root.into(),
            retain_on_delete: false,
        }
    }

    pub fn create(config: LocalBlobstoreConfig) -> Self {
        LocalBlobstore {
            root: config.root,
            retain_on_delete: config.retain_on_delete,
        }
    }

    pub fn with_retain_on_delete(mut self, retain: bool) -> Self {
        self.retain_on_delete = retain;
        self
    }

    fn space_dir(&self, space_id: &SpaceId) -> PathBuf {
        self.root
            .join("spaces")
            .join(space_id.as_str())
            .join("blobs")
    }

    fn blob_path(&self, space_id: &SpaceId, blob_id: &BlobId) -> PathBuf {
        self.space_dir(space_id)
            .join(pathify(blob_id.as_str(), 4, 2))
    }

    fn path_for(&self, node: &Node) -> DfsResult<PathBuf> {
        let blob_id = require_blob_id(node)?;
        Ok(self.blob_path(&node.space_id, blob_id))
    }

    /// Ids of all blobs currently stored for `space_id`.
    pub fn blob_ids(&self, space_id: &SpaceId) -> DfsResult<Vec<BlobId>> {
        let dir = self.space_dir(space_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| {
                DfsError::io(
                    format!("walk {}", dir.display()),
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::other("directory loop")),
                )
            })?;
            // skip temp files of interrupted uploads
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let joined: String = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            if let Ok(id) = BlobId::new(joined) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl Blobstore for LocalBlobstore {
    fn upload(&self, node: &Node, source: &Path) -> DfsResult<()> {
        let dest = self.path_for(node)?;
        let dir = dest
            .parent()
            .ok_or_else(|| DfsError::InvalidArgument(format!("bad blob path {}", dest.display())))?;
        std::fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;

        let mut src = File::open(source).io_context(|| format!("open {}", source.display()))?;
        // temp file in the destination dir so the final rename stays on one filesystem
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(dir)
            .io_context(|| format!("create temp file in {}", dir.display()))?;
        let written = io::copy(&mut src, &mut tmp).io_context(|| "copy blob content")?;
        tmp.as_file()
            .sync_all()
            .io_context(|| "sync blob content")?;
        tmp.persist(&dest)
            .map_err(|e| DfsError::io(format!("persist {}", dest.display()), e.error))?;

        debug!(space = %node.space_id, node = %node.id, bytes = written, "uploaded blob");
        Ok(())
    }

    fn download(&self, node: &Node) -> DfsResult<BlobReader> {
        let path = self.path_for(node)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DfsError::BlobNotFound(format!(
                "{}/{}",
                node.space_id,
                require_blob_id(node)?
            ))),
            Err(e) => Err(DfsError::io(format!("open {}", path.display()), e)),
        }
    }

    fn delete(&self, node: &Node) -> DfsResult<()> {
        let path = self.path_for(node)?;
        if self.retain_on_delete {
            info!(
                space = %node.space_id,
                node = %node.id,
                path = %path.display(),
                "retaining blob of deleted node for external garbage collection"
            );
            return Ok(());
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DfsError::io(format!("remove {}", path.display()), e)),
        }
    }
}
