use crate::lookup::PathLookup;
use dfs_core::{Node, Permission, PermissionSet, Permissions, Reference};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Permission checks driven by node metadata.
///
/// Admin subjects may do anything. Otherwise the ancestry of the target is
/// walked up to the space root: an owner matching the subject allows
/// everything, and grants found on the way are merged. References to a
/// node that does not exist yet are checked against its parent.
#[derive(Debug)]
pub struct GrantPermissions {
    lookup: Arc<dyn PathLookup>,
    admins: BTreeSet<String>,
}

impl GrantPermissions {
    pub fn new(lookup: Arc<dyn PathLookup>) -> Self {
        Self {
            lookup,
            admins: BTreeSet::new(),
        }
    }

    pub fn with_admins<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admins.extend(admins.into_iter().map(Into::into));
        self
    }

    fn target(&self, reference: &Reference) -> Option<Node> {
        match self.lookup.node_from_resource(reference) {
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => self
                .lookup
                .resolve_parent(reference)
                .ok()
                .map(|(parent, _)| parent),
            Err(e) => {
                debug!(%reference, error = %e, "permission target lookup failed");
                None
            }
        }
    }

    fn effective(&self, subject: &str, node: &Node) -> Option<PermissionSet> {
        let mut granted = PermissionSet::empty();
        let mut current = node.clone();
        loop {
            if current.owner.as_ref().is_some_and(|o| o.user_id == subject) {
                return Some(PermissionSet::all());
            }
            if let Some(set) = current.grants.get(subject) {
                granted = granted.union(*set);
            }
            let Some(parent_id) = current.parent_id.clone() else {
                return Some(granted);
            };
            current = self.lookup.node_from_id(&current.space_id, &parent_id).ok()?;
        }
    }
}

impl Permissions for GrantPermissions {
    fn check_permission(&self, permission: &str, subject: &str, reference: &Reference) -> bool {
        let Some(permission) = Permission::parse(permission) else {
            return false;
        };
        if self.admins.contains(subject) {
            return true;
        }
        let Some(node) = self.target(reference) else {
            return false;
        };
        self.effective(subject, &node)
            .is_some_and(|set| set.contains(permission))
    }
}
