//! Core decomposedfs types and traits.
//!
//! This crate defines the shared types and traits used by all decomposedfs
//! crates.
//!
//! ## Model types
//!
//! - Identifiers (`SpaceId`, `NodeId`, `BlobId`)
//! - Nodes and their metadata (`Node`, `NodeType`, `Owner`, `Revision`)
//! - Addressing (`Reference`)
//! - Trash bookkeeping (`TrashRecord`)
//!
//! Node and trash records are persisted as CBOR by metadata backends;
//! changes to their field numbering are on-disk format changes.
//!
//! ## Component seams
//!
//! - Content storage (`Blobstore`); implementations in `dfs_blobstore_local`
//!   and `dfs_blobstore_memory`
//! - Node metadata persistence (`MetadataBackend`); implementations in
//!   `dfs_metadata_file` and `dfs_metadata_memory`
//! - Authorization (`Permissions`)
//! - OS identity scoping (`UserMapper`, `ScopeGuard`)
//! - Event publishing (`EventSink`)
//!
//! ## Caches
//!
//! - [`mtimesync::Cache`]: per-key locked cache that recomputes only when
//!   a modification time advances
//! - [`IdCache`]: `(space, node)` keyed cache over a pluggable `IdStore`
//!
//! All component traits are synchronous: implementations block on I/O and
//! are driven from tokio's blocking pool by the engine facade in `dfs_fs`.

pub mod blobstore;
pub mod context;
pub mod error;
pub mod events;
pub mod id;
pub mod idcache;
pub mod metadata;
pub mod mtimesync;
pub mod node;
pub mod permissions;
pub mod usermapper;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

// --- Core Public Surface ---

pub use blobstore::{BlobReader, Blobstore};
pub use context::{RequestContext, User};
pub use error::{DfsError, DfsResult, ErrorKind};
pub use events::{ChannelSink, Event, EventSink, NoopSink};
pub use id::{BlobId, NodeId, SpaceId};
pub use idcache::{IdCache, IdStore, MemoryIdStore};
pub use metadata::{MetadataBackend, TrashRecord};
pub use node::{Node, NodeType, Owner, Reference, Revision, Timestamp, TrashInfo};
pub use permissions::{Permission, PermissionSet, Permissions, StaticPermissions};
pub use usermapper::{Identity, NullMapper, ScopeGuard, UserMapper};

#[cfg(target_os = "linux")]
pub use usermapper::UnixMapper;
