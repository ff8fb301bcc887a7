//! Permission vocabulary and the authorization seam.

use crate::node::Reference;
use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use std::fmt::Debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    Stat,
    ListContainer,
    CreateContainer,
    InitiateFileUpload,
    InitiateFileDownload,
    Move,
    Delete,
    ListRecycle,
    RestoreRecycleItem,
    PurgeRecycle,
    ListFileVersions,
    RestoreFileVersion,
    AddGrant,
    RemoveGrant,
}

impl Permission {
    pub const ALL: [Permission; 14] = [
        Permission::Stat,
        Permission::ListContainer,
        Permission::CreateContainer,
        Permission::InitiateFileUpload,
        Permission::InitiateFileDownload,
        Permission::Move,
        Permission::Delete,
        Permission::ListRecycle,
        Permission::RestoreRecycleItem,
        Permission::PurgeRecycle,
        Permission::ListFileVersions,
        Permission::RestoreFileVersion,
        Permission::AddGrant,
        Permission::RemoveGrant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Stat => "stat",
            Permission::ListContainer => "list_container",
            Permission::CreateContainer => "create_container",
            Permission::InitiateFileUpload => "initiate_file_upload",
            Permission::InitiateFileDownload => "initiate_file_download",
            Permission::Move => "move",
            Permission::Delete => "delete",
            Permission::ListRecycle => "list_recycle",
            Permission::RestoreRecycleItem => "restore_recycle_item",
            Permission::PurgeRecycle => "purge_recycle",
            Permission::ListFileVersions => "list_file_versions",
            Permission::RestoreFileVersion => "restore_file_version",
            Permission::AddGrant => "add_grant",
            Permission::RemoveGrant => "remove_grant",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// Bit set of [`Permission`]s, stored on nodes as grants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PermissionSet(u32);

impl PermissionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::from_iter(Permission::ALL)
    }

    pub fn viewer() -> Self {
        Self::from_iter([
            Permission::Stat,
            Permission::ListContainer,
            Permission::InitiateFileDownload,
            Permission::ListFileVersions,
        ])
    }

    pub fn editor() -> Self {
        Self::viewer().union(Self::from_iter([
            Permission::CreateContainer,
            Permission::InitiateFileUpload,
            Permission::Move,
            Permission::Delete,
            Permission::ListRecycle,
            Permission::RestoreRecycleItem,
            Permission::RestoreFileVersion,
        ]))
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0 |= permission.bit();
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::empty();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

impl<C> Encode<C> for PermissionSet {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.u32(self.0)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for PermissionSet {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        Ok(Self(d.u32()?))
    }
}

/// Pure authorization decision over (permission, subject, reference).
///
/// Unknown permission names must be denied.
pub trait Permissions: Send + Sync + Debug {
    fn check_permission(&self, permission: &str, subject: &str, reference: &Reference) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    allow: bool,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

impl Permissions for StaticPermissions {
    fn check_permission(&self, permission: &str, _subject: &str, _reference: &Reference) -> bool {
        self.allow && Permission::parse(permission).is_some()
    }
}
