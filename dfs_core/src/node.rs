//! Node records and addressing.

use crate::error::{DfsError, DfsResult};
use crate::id::{BlobId, NodeId, SpaceId};
use crate::permissions::PermissionSet;
use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Separates a node id from the revision timestamp in revision keys.
pub const REVISION_DELIMITER: &str = ".REV.";

#[repr(u8)]
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(index_only)]
pub enum NodeType {
    #[n(0)]
    File = 0,
    #[n(1)]
    Container = 1,
}

/// Nanoseconds since the unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Times before the epoch clamp to zero.
    pub fn from_system_time(t: SystemTime) -> Self {
        let nanos = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or_default();
        Self(nanos)
    }

    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }

    pub fn to_datetime(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_nanos(self.0.min(i64::MAX as u64) as i64)
    }

    pub fn saturating_sub(&self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_nanos().min(u64::MAX as u128) as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl<C> Encode<C> for Timestamp {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.u64(self.0)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for Timestamp {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        Ok(Self(d.u64()?))
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Owner {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub uid: Option<u32>,
    #[n(2)]
    pub gid: Option<u32>,
}

impl Owner {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            uid: None,
            gid: None,
        }
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct TrashInfo {
    /// Space-relative path the node had when it was deleted.
    #[n(0)]
    pub origin: String,
    #[n(1)]
    pub deleted_at: Timestamp,
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Revision {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub blob_id: Option<BlobId>,
    #[n(2)]
    pub blob_size: u64,
    #[n(3)]
    pub mtime: Timestamp,
    #[n(4)]
    pub checksum: Option<String>,
}

/// Logical file or directory.
///
/// The content lives in a blob referenced by `blob_id`; renaming or moving
/// a node never touches it.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct Node {
    #[n(0)]
    pub space_id: SpaceId,
    #[n(1)]
    pub id: NodeId,
    #[n(2)]
    pub parent_id: Option<NodeId>,
    #[n(3)]
    pub name: String,
    #[n(4)]
    pub node_type: NodeType,
    #[n(5)]
    pub blob_id: Option<BlobId>,
    #[n(6)]
    pub blob_size: u64,
    #[n(7)]
    pub mtime: Timestamp,
    #[n(8)]
    pub checksum: Option<String>,
    #[n(9)]
    pub owner: Option<Owner>,
    #[n(10)]
    pub grants: BTreeMap<String, PermissionSet>,
    #[n(11)]
    pub trashed: Option<TrashInfo>,
    #[n(12)]
    pub revisions: Vec<Revision>,
}

impl Node {
    fn new(
        space_id: SpaceId,
        id: NodeId,
        parent_id: Option<NodeId>,
        name: String,
        node_type: NodeType,
    ) -> Self {
        Self {
            space_id,
            id,
            parent_id,
            name,
            node_type,
            blob_id: None,
            blob_size: 0,
            mtime: Timestamp::now(),
            checksum: None,
            owner: None,
            grants: BTreeMap::new(),
            trashed: None,
            revisions: Vec::new(),
        }
    }

    pub fn new_container(
        space_id: SpaceId,
        id: NodeId,
        parent_id: Option<NodeId>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(space_id, id, parent_id, name.into(), NodeType::Container)
    }

    pub fn new_file(
        space_id: SpaceId,
        id: NodeId,
        parent_id: NodeId,
        name: impl Into<String>,
    ) -> Self {
        Self::new(space_id, id, Some(parent_id), name.into(), NodeType::File)
    }

    /// Root node of a space: a parentless, unnamed container whose id is
    /// the space id.
    pub fn space_root(space_id: SpaceId, owner: Option<Owner>) -> Self {
        let id = NodeId::space_root(&space_id);
        let mut node = Self::new_container(space_id, id, None, "");
        node.owner = owner;
        node
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Container
    }

    pub fn is_space_root(&self) -> bool {
        self.parent_id.is_none() && self.id.as_str() == self.space_id.as_str()
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed.is_some()
    }

    pub fn reference(&self) -> Reference {
        Reference::node(self.space_id.clone(), self.id.clone())
    }

    pub fn revision_key(&self) -> String {
        format!("{}{REVISION_DELIMITER}{}", self.id, self.mtime.as_nanos())
    }

    pub fn to_bytes(&self) -> DfsResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| DfsError::Corrupt(format!("encode node: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> DfsResult<Self> {
        minicbor::decode(bytes).map_err(|e| DfsError::Corrupt(format!("decode node: {e}")))
    }
}

/// Checks that `name` is usable as a single path segment.
pub fn validate_name(name: &str) -> DfsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(DfsError::InvalidArgument(format!("invalid name '{name}'")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(DfsError::InvalidArgument(format!(
            "name '{name}' contains a path separator or NUL"
        )));
    }
    Ok(())
}

/// Addresses a node: a start node (the space root when `node_id` is `None`)
/// plus a path relative to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub space_id: SpaceId,
    pub node_id: Option<NodeId>,
    pub path: String,
}

impl Reference {
    pub fn space(space_id: SpaceId) -> Self {
        Self {
            space_id,
            node_id: None,
            path: String::new(),
        }
    }

    pub fn path(space_id: SpaceId, path: impl Into<String>) -> Self {
        Self {
            space_id,
            node_id: None,
            path: path.into(),
        }
    }

    pub fn node(space_id: SpaceId, node_id: NodeId) -> Self {
        Self {
            space_id,
            node_id: Some(node_id),
            path: String::new(),
        }
    }

    pub fn join(&self, name: &str) -> Self {
        Self {
            space_id: self.space_id.clone(),
            node_id: self.node_id.clone(),
            path: join_path(&self.path, name),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.space_id)?;
        if let Some(node_id) = &self.node_id {
            write!(f, "!{node_id}")?;
        }
        if !self.path.is_empty() {
            write!(f, ":{}", self.path)?;
        }
        Ok(())
    }
}

/// Splits a relative path into its segments, dropping empty and `.`
/// segments. `..` is rejected.
pub fn path_segments(path: &str) -> DfsResult<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(DfsError::InvalidArgument(format!(
                    "path '{path}' escapes its start node"
                )));
            }
            s if s.contains('\0') => {
                return Err(DfsError::InvalidArgument("path contains NUL".into()));
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// Joins a space-relative path and a name. Paths are `/`-rooted; the root
/// itself is `/`.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return if base.is_empty() { "/".into() } else { base.into() };
    }
    format!("{base}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SpaceId {
        SpaceId::new("space1").unwrap()
    }

    #[test]
    fn node_cbor_roundtrip_keeps_optional_fields() {
        let mut node = Node::new_file(
            space(),
            NodeId::new("n1").unwrap(),
            NodeId::space_root(&space()),
            "a.txt",
        );
        node.blob_id = Some(BlobId::new("b1").unwrap());
        node.blob_size = 42;
        node.owner = Some(Owner {
            user_id: "alice".into(),
            uid: Some(1000),
            gid: None,
        });
        node.grants.insert("bob".into(), PermissionSet::viewer());
        node.trashed = Some(TrashInfo {
            origin: "/a.txt".into(),
            deleted_at: Timestamp::from_nanos(7),
        });

        let decoded = Node::from_bytes(&node.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = Node::from_bytes(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, DfsError::Corrupt(_)));
    }

    #[test]
    fn space_root_shares_space_id() {
        let root = Node::space_root(space(), None);
        assert!(root.is_space_root());
        assert!(root.is_dir());
        assert_eq!(root.id.as_str(), "space1");
    }

    #[test]
    fn path_helpers() {
        assert_eq!(path_segments("/a/./b/").unwrap(), vec!["a", "b"]);
        assert!(path_segments("a/../b").is_err());
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(join_path("", "a"), "/a");
        assert_eq!(join_path("/a", ""), "/a");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn names_reject_separators() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("report (1).pdf").is_ok());
    }
}
