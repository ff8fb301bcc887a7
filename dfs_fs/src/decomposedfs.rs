//! Async engine facade.
//!
//! Every operation checks permissions, switches to the space owner's
//! filesystem identity and then runs the blocking work on tokio's blocking
//! pool. The identity scope never leaves that pool thread.

use crate::aspects::Aspects;
use crate::restore::{RestoreConflict, keep_both_name};
use crate::trashbin::{PurgeReport, RecycleItem};
use dfs_core::node::{join_path, path_segments};
use dfs_core::{
    BlobId, BlobReader, DfsError, DfsResult, ErrorKind, Event, Node, NodeType, Owner, Permission,
    PermissionSet, Reference, RequestContext, Revision, ScopeGuard, SpaceId, Timestamp,
    TrashRecord, User,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of [`Decomposedfs::restore_all`].
#[derive(Debug, Default)]
pub struct RestoreAllReport {
    /// Trash key and the reference the item was restored to.
    pub restored: Vec<(String, Reference)>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, DfsError)>,
}

#[derive(Debug, Clone)]
pub struct Decomposedfs {
    aspects: Arc<Aspects>,
}

impl Decomposedfs {
    /// Wraps `aspects` and prepares the metadata storage.
    pub async fn open(aspects: Aspects) -> DfsResult<Self> {
        let fs = Self {
            aspects: Arc::new(aspects),
        };
        fs.blocking(|a| a.tree.setup()).await?;
        Ok(fs)
    }

    pub fn aspects(&self) -> &Aspects {
        &self.aspects
    }

    async fn blocking<T, F>(&self, f: F) -> DfsResult<T>
    where
        F: FnOnce(&Aspects) -> DfsResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let aspects = self.aspects.clone();
        tokio::task::spawn_blocking(move || f(&aspects))
            .await
            .map_err(|e| DfsError::Backend(format!("blocking task failed: {e}")))?
    }

    /// Creates a space owned by `owner`. Runs as the base identity and is
    /// not subject to permission checks.
    pub async fn create_space(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
        owner: &User,
    ) -> DfsResult<Node> {
        let (ctx, space_id) = (ctx.clone(), space_id.clone());
        let owner = Owner {
            user_id: owner.id.clone(),
            uid: owner.uid,
            gid: owner.gid,
        };
        self.blocking(move |a| {
            let mut created = None;
            a.user_mapper.run_in_base_scope(&mut || {
                created = Some(a.tree.create_space(&space_id, Some(owner.clone()))?);
                Ok(())
            })?;
            let root = created.ok_or_else(|| DfsError::Backend("space was not created".into()))?;
            publish(
                a,
                Event::ContainerCreated {
                    executant: ctx.executant().id.clone(),
                    reference: Reference::space(space_id.clone()),
                    timestamp: Timestamp::now(),
                },
            );
            Ok(root)
        })
        .await
    }

    /// Spaces whose root the caller may stat.
    pub async fn list_spaces(&self, ctx: &RequestContext) -> DfsResult<Vec<SpaceId>> {
        let ctx = ctx.clone();
        self.blocking(move |a| {
            let spaces = a.lookup.metadata().list_spaces()?;
            Ok(spaces
                .into_iter()
                .filter(|space| {
                    a.permissions.check_permission(
                        Permission::Stat.as_str(),
                        ctx.subject(),
                        &Reference::space(space.clone()),
                    )
                })
                .collect())
        })
        .await
    }

    pub async fn create_dir(&self, ctx: &RequestContext, reference: &Reference) -> DfsResult<Node> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::CreateContainer, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let (parent, name) = a.lookup.resolve_parent(&reference)?;
            let dir = a.tree.create(&parent, &name, NodeType::Container)?;
            publish(
                a,
                Event::ContainerCreated {
                    executant: ctx.executant().id.clone(),
                    reference: reference.clone(),
                    timestamp: Timestamp::now(),
                },
            );
            Ok(dir)
        })
        .await
    }

    /// Stores the content of `source` at `reference`, creating the file or
    /// replacing the content of an existing one.
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        source: PathBuf,
    ) -> DfsResult<Node> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::InitiateFileUpload, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let node = upload_blocking(a, &reference, &source)?;

            let owner = a
                .lookup
                .node_from_space_id(&reference.space_id)?
                .owner
                .map(|o| o.user_id)
                .unwrap_or_else(|| ctx.user.id.clone());
            publish(
                a,
                Event::FileUploaded {
                    owner,
                    executant: ctx.executant().id.clone(),
                    reference: reference.clone(),
                    timestamp: node.mtime,
                },
            );
            Ok(node)
        })
        .await
    }

    pub async fn download(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> DfsResult<(Node, BlobReader)> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::InitiateFileDownload, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let node = a.lookup.node_from_resource(&reference)?;
            let reader = a.tree.read_blob(&node)?;
            Ok((node, reader))
        })
        .await
    }

    pub async fn stat(&self, ctx: &RequestContext, reference: &Reference) -> DfsResult<Node> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::Stat, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            a.lookup.node_from_resource(&reference)
        })
        .await
    }

    pub async fn list_folder(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> DfsResult<Vec<Node>> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::ListContainer, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let dir = a.lookup.node_from_resource(&reference)?;
            a.tree.list(&dir)?.collect()
        })
        .await
    }

    /// Moves or renames the node at `from` to `to`. An existing node at
    /// `to` is replaced.
    pub async fn move_node(
        &self,
        ctx: &RequestContext,
        from: &Reference,
        to: &Reference,
    ) -> DfsResult<Node> {
        let (ctx, from, to) = (ctx.clone(), from.clone(), to.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::Move, &from)?;
            check(a, &ctx, Permission::Move, &to)?;
            if from.space_id != to.space_id {
                return Err(DfsError::NotSupported(
                    "moving nodes across spaces is not supported".into(),
                ));
            }
            let _scope = scoped(a, &from.space_id)?;
            let node = a.lookup.node_from_resource(&from)?;
            let old_path = a.lookup.path(&node)?;
            let (parent, name) = a.lookup.resolve_parent(&to)?;
            let moved = a.tree.move_node(&node, &parent, &name)?;
            let new_path = a.lookup.path(&moved)?;
            publish(
                a,
                Event::ItemMoved {
                    executant: ctx.executant().id.clone(),
                    old_reference: Reference::path(from.space_id.clone(), old_path),
                    reference: Reference::path(to.space_id.clone(), new_path),
                    timestamp: Timestamp::now(),
                },
            );
            Ok(moved)
        })
        .await
    }

    /// Moves the node into the trash-bin.
    pub async fn delete(&self, ctx: &RequestContext, reference: &Reference) -> DfsResult<TrashRecord> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::Delete, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let node = a.lookup.node_from_resource(&reference)?;
            let record = a.tree.delete(&node)?;
            publish(
                a,
                Event::ItemTrashed {
                    executant: ctx.executant().id.clone(),
                    key: record.key.clone(),
                    reference: Reference::path(record.space_id.clone(), record.origin.clone()),
                    timestamp: record.deleted_at,
                },
            );
            Ok(record)
        })
        .await
    }

    pub async fn list_recycle(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<Vec<RecycleItem>> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        let (key, relative_path) = (key.to_string(), relative_path.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::ListRecycle, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            a.trashbin.list_recycle(&reference, &key, &relative_path)
        })
        .await
    }

    pub async fn restore_recycle_item(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        key: &str,
        relative_path: &str,
        restore_ref: Option<&Reference>,
    ) -> DfsResult<Node> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        let (key, relative_path) = (key.to_string(), relative_path.to_string());
        let restore_ref = restore_ref.cloned();
        self.blocking(move |a| {
            check(a, &ctx, Permission::RestoreRecycleItem, &reference)?;
            if let Some(target) = &restore_ref {
                check(a, &ctx, Permission::InitiateFileUpload, target)?;
            }
            let _scope = scoped(a, &reference.space_id)?;
            let node = a.trashbin.restore_recycle_item(
                &reference,
                &key,
                &relative_path,
                restore_ref.as_ref(),
            )?;
            publish_restored(a, &ctx, &key, &node)?;
            Ok(node)
        })
        .await
    }

    /// Restores every trash root of the space to its origin, resolving
    /// occupied destinations with `policy`. Failures are reported per item.
    pub async fn restore_all(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        policy: RestoreConflict,
    ) -> DfsResult<RestoreAllReport> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::RestoreRecycleItem, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let mut report = RestoreAllReport::default();
            for item in a.trashbin.list_recycle(&reference, "", "")? {
                match restore_with_policy(a, &reference, &item, policy) {
                    Ok(Some(node)) => {
                        publish_restored(a, &ctx, &item.key, &node)?;
                        let path = a.lookup.path(&node)?;
                        report
                            .restored
                            .push((item.key, Reference::path(node.space_id, path)));
                    }
                    Ok(None) => report.skipped.push(item.key),
                    Err(e) => {
                        warn!(key = %item.key, error = %e, "failed to restore trash item");
                        report.failed.push((item.key, e));
                    }
                }
            }
            info!(
                space = %reference.space_id,
                restored = report.restored.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                %policy,
                "restored trash-bin"
            );
            Ok(report)
        })
        .await
    }

    pub async fn purge_recycle_item(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        key: &str,
        relative_path: &str,
    ) -> DfsResult<()> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        let (key, relative_path) = (key.to_string(), relative_path.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::PurgeRecycle, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            a.trashbin
                .purge_recycle_item(&reference, &key, &relative_path)?;
            publish_purged(a, &ctx, &reference.space_id, [&key]);
            Ok(())
        })
        .await
    }

    pub async fn empty_recycle(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> DfsResult<PurgeReport> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::PurgeRecycle, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let report = a.trashbin.empty_recycle(&reference)?;
            publish_purged(a, &ctx, &reference.space_id, &report.purged);
            Ok(report)
        })
        .await
    }

    /// Purges trash roots deleted more than `older_than` ago.
    pub async fn purge_expired(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        older_than: Duration,
    ) -> DfsResult<PurgeReport> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::PurgeRecycle, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let report = a.trashbin.purge_expired(&reference, older_than)?;
            publish_purged(a, &ctx, &reference.space_id, &report.purged);
            Ok(report)
        })
        .await
    }

    pub async fn list_revisions(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
    ) -> DfsResult<Vec<Revision>> {
        let (ctx, reference) = (ctx.clone(), reference.clone());
        self.blocking(move |a| {
            check(a, &ctx, Permission::ListFileVersions, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            Ok(a.lookup.node_from_resource(&reference)?.revisions)
        })
        .await
    }

    pub async fn download_revision(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        key: &str,
    ) -> DfsResult<BlobReader> {
        let (ctx, reference, key) = (ctx.clone(), reference.clone(), key.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::ListFileVersions, &reference)?;
            check(a, &ctx, Permission::InitiateFileDownload, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let node = a.lookup.node_from_resource(&reference)?;
            let revision = find_revision(&node, &key)?;
            let mut old = node.clone();
            old.blob_id = revision.blob_id.clone();
            old.blob_size = revision.blob_size;
            a.tree.read_blob(&old)
        })
        .await
    }

    /// Makes revision `key` the current content. The replaced content
    /// becomes a revision itself.
    pub async fn restore_revision(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        key: &str,
    ) -> DfsResult<Node> {
        let (ctx, reference, key) = (ctx.clone(), reference.clone(), key.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::RestoreFileVersion, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let mut node = a.lookup.node_from_resource(&reference)?;
            let index = node
                .revisions
                .iter()
                .position(|r| r.key == key)
                .ok_or_else(|| DfsError::NotFound(format!("revision {key} of {reference}")))?;
            let revision = node.revisions.remove(index);
            node.revisions.push(current_revision(&node));
            node.blob_id = revision.blob_id;
            node.blob_size = revision.blob_size;
            node.checksum = revision.checksum;
            node.mtime = Timestamp::now();
            a.lookup.metadata().write_node(&node)?;
            info!(space = %node.space_id, node = %node.id, revision = %key, "restored revision");
            Ok(node)
        })
        .await
    }

    pub async fn add_grant(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        grantee: &str,
        permissions: PermissionSet,
    ) -> DfsResult<Node> {
        let (ctx, reference, grantee) = (ctx.clone(), reference.clone(), grantee.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::AddGrant, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let mut node = a.lookup.node_from_resource(&reference)?;
            node.grants.insert(grantee, permissions);
            a.lookup.metadata().write_node(&node)?;
            Ok(node)
        })
        .await
    }

    pub async fn remove_grant(
        &self,
        ctx: &RequestContext,
        reference: &Reference,
        grantee: &str,
    ) -> DfsResult<Node> {
        let (ctx, reference, grantee) = (ctx.clone(), reference.clone(), grantee.to_string());
        self.blocking(move |a| {
            check(a, &ctx, Permission::RemoveGrant, &reference)?;
            let _scope = scoped(a, &reference.space_id)?;
            let mut node = a.lookup.node_from_resource(&reference)?;
            if node.grants.remove(&grantee).is_none() {
                return Err(DfsError::NotFound(format!("grant for {grantee} on {reference}")));
            }
            a.lookup.metadata().write_node(&node)?;
            Ok(node)
        })
        .await
    }
}

/// Denied operations report `PermissionDenied` only to callers that may
/// see the target.
fn check(
    a: &Aspects,
    ctx: &RequestContext,
    permission: Permission,
    reference: &Reference,
) -> DfsResult<()> {
    let subject = ctx.subject();
    if a
        .permissions
        .check_permission(permission.as_str(), subject, reference)
    {
        return Ok(());
    }
    debug!(subject, permission = permission.as_str(), %reference, "permission denied");
    if permission != Permission::Stat
        && a
            .permissions
            .check_permission(Permission::Stat.as_str(), subject, reference)
    {
        Err(DfsError::PermissionDenied(format!(
            "{subject} may not {} {reference}",
            permission.as_str()
        )))
    } else {
        Err(DfsError::NotFound(reference.to_string()))
    }
}

/// Scopes the current thread to the owner of the space, or to the base
/// identity when the owner has no uid/gid.
fn scoped(a: &Aspects, space_id: &SpaceId) -> DfsResult<ScopeGuard> {
    let root = a.lookup.node_from_space_id(space_id)?;
    match root.owner.and_then(|o| o.uid.zip(o.gid)) {
        Some((uid, gid)) => a.user_mapper.scope_user_by_ids(uid, gid),
        None => a.user_mapper.scope_base(),
    }
}

fn publish(a: &Aspects, event: Event) {
    if let Err(e) = a.events.publish(event) {
        warn!(error = %e, "failed to publish event");
    }
}

fn publish_restored(a: &Aspects, ctx: &RequestContext, key: &str, node: &Node) -> DfsResult<()> {
    let path = a.lookup.path(node)?;
    publish(
        a,
        Event::ItemRestored {
            executant: ctx.executant().id.clone(),
            key: key.to_string(),
            reference: Reference::path(node.space_id.clone(), path),
            timestamp: Timestamp::now(),
        },
    );
    Ok(())
}

fn publish_purged<I, S>(a: &Aspects, ctx: &RequestContext, space_id: &SpaceId, keys: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for key in keys {
        publish(
            a,
            Event::ItemPurged {
                executant: ctx.executant().id.clone(),
                key: key.as_ref().to_string(),
                space_id: space_id.clone(),
                timestamp: Timestamp::now(),
            },
        );
    }
}

fn current_revision(node: &Node) -> Revision {
    Revision {
        key: node.revision_key(),
        blob_id: node.blob_id.clone(),
        blob_size: node.blob_size,
        mtime: node.mtime,
        checksum: node.checksum.clone(),
    }
}

fn find_revision<'a>(node: &'a Node, key: &str) -> DfsResult<&'a Revision> {
    node.revisions
        .iter()
        .find(|r| r.key == key)
        .ok_or_else(|| DfsError::NotFound(format!("revision {key} of node {}", node.id)))
}

fn checksum(source: &Path) -> DfsResult<String> {
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_mmap_rayon(source)
        .map_err(|e| DfsError::io(format!("hash {}", source.display()), e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn upload_blocking(a: &Aspects, reference: &Reference, source: &Path) -> DfsResult<Node> {
    let size = std::fs::metadata(source)
        .map_err(|e| DfsError::io(format!("stat {}", source.display()), e))?
        .len();
    let checksum = checksum(source)?;

    let (previous, created) = match a.lookup.node_from_resource(reference) {
        Ok(node) => (Some(node), None),
        Err(e) if e.is_not_found() => {
            let (parent, name) = a.lookup.resolve_parent(reference)?;
            match a.tree.create(&parent, &name, NodeType::File) {
                Ok(node) => (None, Some(node)),
                // lost a race against a concurrent upload of the same name
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    (Some(a.lookup.node_from_resource(reference)?), None)
                }
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };
    let base = match (&previous, &created) {
        (Some(node), _) | (None, Some(node)) => node.clone(),
        (None, None) => return Err(DfsError::Backend("upload target vanished".into())),
    };
    if base.is_dir() {
        return Err(DfsError::InvalidArgument(format!("{reference} is a container")));
    }

    let mut node = base.clone();
    node.blob_id = (size > 0).then(BlobId::generate);
    node.blob_size = size;
    node.checksum = Some(checksum);
    node.mtime = Timestamp::now();

    let stored = (|| {
        if node.blob_id.is_some() {
            a.tree.write_blob(&node, source)?;
        }
        if a.options.enable_versioning
            && let Some(old) = &previous
        {
            node.revisions.push(current_revision(old));
        }
        a.lookup.metadata().write_node(&node)
    })();
    if let Err(e) = stored {
        if let Err(cleanup) = a.tree.delete_blob(&node) {
            warn!(node = %node.id, error = %cleanup, "failed to remove blob of failed upload");
        }
        if let Some(fresh) = &created
            && let Err(cleanup) = discard_created(a, fresh)
        {
            warn!(node = %fresh.id, error = %cleanup, "failed to remove node of failed upload");
        }
        return Err(e);
    }

    if !a.options.enable_versioning
        && let Some(old) = &previous
        && let Err(e) = a.tree.delete_blob(old)
    {
        warn!(node = %old.id, error = %e, "failed to delete replaced blob");
    }
    debug!(space = %node.space_id, node = %node.id, size, "uploaded file");
    Ok(node)
}

fn discard_created(a: &Aspects, node: &Node) -> DfsResult<()> {
    a.tree.purge_subtree(node)?;
    match &node.parent_id {
        Some(parent_id) => a
            .lookup
            .metadata()
            .unlink_child(&node.space_id, parent_id, &node.name),
        None => Ok(()),
    }
}

fn restore_with_policy(
    a: &Aspects,
    reference: &Reference,
    item: &RecycleItem,
    policy: RestoreConflict,
) -> DfsResult<Option<Node>> {
    let first = a
        .trashbin
        .restore_recycle_item(reference, &item.key, "", None);
    let err = match first {
        Ok(node) => return Ok(Some(node)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => e,
        Err(e) => return Err(e),
    };
    match policy {
        RestoreConflict::Skip => Ok(None),
        RestoreConflict::Replace => {
            let existing = a.lookup.node_from_resource(&item.reference)?;
            a.tree.delete(&existing)?;
            a.trashbin
                .restore_recycle_item(reference, &item.key, "", None)
                .map(Some)
        }
        RestoreConflict::KeepBoth => {
            let segments = path_segments(&item.reference.path)?;
            let Some((name, parents)) = segments.split_last() else {
                return Err(err);
            };
            let parent_path = join_path("", &parents.join("/"));
            for n in 1..=a.options.max_rename_attempts {
                let target = Reference::path(
                    item.reference.space_id.clone(),
                    join_path(&parent_path, &keep_both_name(name, n)),
                );
                match a
                    .trashbin
                    .restore_recycle_item(reference, &item.key, "", Some(&target))
                {
                    Ok(node) => return Ok(Some(node)),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(err)
        }
    }
}
