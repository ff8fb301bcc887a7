use crate::lookup::PathLookup;
use crate::restore::DEFAULT_MAX_RENAME_ATTEMPTS;
use crate::trashbin::{DecomposedTrashbin, Trashbin};
use crate::tree::Tree;
use dfs_core::{Blobstore, EventSink, Permissions, UserMapper};
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Keep the previous content of a file as a revision on overwrite.
    pub enable_versioning: bool,
    /// How many `name (n)` candidates a keep-both restore tries.
    pub max_rename_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_versioning: false,
            max_rename_attempts: DEFAULT_MAX_RENAME_ATTEMPTS,
        }
    }
}

/// The pluggable parts an engine is assembled from.
///
/// Tree and trash-bin are derived from the lookup and blobstore, so
/// swapping those two retargets the whole engine.
#[derive(Debug, Clone)]
pub struct Aspects {
    pub lookup: Arc<dyn PathLookup>,
    pub tree: Arc<Tree>,
    pub blobstore: Arc<dyn Blobstore>,
    pub trashbin: Arc<dyn Trashbin>,
    pub permissions: Arc<dyn Permissions>,
    pub user_mapper: Arc<dyn UserMapper>,
    pub events: Arc<dyn EventSink>,
    pub options: Options,
}

impl Aspects {
    pub fn new(
        lookup: Arc<dyn PathLookup>,
        blobstore: Arc<dyn Blobstore>,
        permissions: Arc<dyn Permissions>,
        user_mapper: Arc<dyn UserMapper>,
        events: Arc<dyn EventSink>,
        options: Options,
    ) -> Self {
        let tree = Arc::new(Tree::new(lookup.clone(), blobstore.clone()));
        let trashbin = Arc::new(DecomposedTrashbin::new(tree.clone()));
        Self {
            lookup,
            tree,
            blobstore,
            trashbin,
            permissions,
            user_mapper,
            events,
            options,
        }
    }
}
