//! Decomposed filesystem engine.
//!
//! Files and directories are nodes persisted by a
//! [`MetadataBackend`](dfs_core::MetadataBackend); their content lives in a
//! [`Blobstore`](dfs_core::Blobstore) under blob ids that never change when
//! a node is renamed or moved.
//!
//! - [`lookup`]: resolving references to nodes
//! - [`tree`]: create, list, move, soft-delete and purge
//! - [`trashbin`]: listing, restoring and purging trashed items
//! - [`permissions`]: grant and ownership based authorization
//! - [`aspects`]: the composition root
//! - [`Decomposedfs`]: the async facade used by binaries

pub mod aspects;
pub mod decomposedfs;
pub mod lookup;
pub mod permissions;
pub mod restore;
pub mod trashbin;
pub mod tree;

pub use aspects::{Aspects, Options};
pub use decomposedfs::{Decomposedfs, RestoreAllReport};
pub use lookup::{Lookup, PathLookup};
pub use permissions::GrantPermissions;
pub use restore::{DEFAULT_MAX_RENAME_ATTEMPTS, RestoreConflict, keep_both_name};
pub use trashbin::{DecomposedTrashbin, PurgeReport, RecycleItem, Trashbin};
pub use tree::{Children, Tree};
