//! Scoped switching of the filesystem identity (fs uid/gid).
//!
//! A scope call returns a [`ScopeGuard`] that restores the previous
//! identity when dropped. Credentials are per OS thread, so the guard is
//! `!Send`; callers run scoped regions on a single thread (the engine uses
//! `spawn_blocking`).

use crate::context::RequestContext;
use crate::error::{DfsError, DfsResult};
use std::cell::Cell;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Effective ids of the running process.
    #[cfg(unix)]
    pub fn process() -> Self {
        Self {
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        }
    }

    #[cfg(not(unix))]
    pub fn process() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// Restores the identity that was active before the scope was entered.
#[must_use = "the previous identity is restored when the guard is dropped"]
pub struct ScopeGuard {
    restore: Option<Box<dyn FnOnce()>>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn new(restore: impl FnOnce() + 'static) -> Self {
        Self {
            restore: Some(Box::new(restore)),
            _not_send: PhantomData,
        }
    }

    /// A guard with nothing to restore.
    pub fn noop() -> Self {
        Self {
            restore: None,
            _not_send: PhantomData,
        }
    }

    /// Restores the previous identity now.
    pub fn unscope(self) {
        drop(self)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

impl Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("armed", &self.restore.is_some())
            .finish()
    }
}

pub trait UserMapper: Send + Sync + Debug {
    /// Identity filesystem calls on this thread currently run as.
    fn current_identity(&self) -> Identity;

    /// The service identity.
    fn base_identity(&self) -> Identity;

    fn scope_user_by_ids(&self, uid: u32, gid: u32) -> DfsResult<ScopeGuard>;

    fn scope_base(&self) -> DfsResult<ScopeGuard> {
        let base = self.base_identity();
        self.scope_user_by_ids(base.uid, base.gid)
    }

    /// Fails with `InvalidArgument` when the user has no uid/gid.
    fn scope_user(&self, ctx: &RequestContext) -> DfsResult<ScopeGuard> {
        match (ctx.user.uid, ctx.user.gid) {
            (Some(uid), Some(gid)) => self.scope_user_by_ids(uid, gid),
            _ => Err(DfsError::InvalidArgument(format!(
                "user {} has no uid/gid",
                ctx.user.id
            ))),
        }
    }

    /// Runs `f` as the base identity, restoring the prior identity after.
    fn run_in_base_scope(&self, f: &mut dyn FnMut() -> DfsResult<()>) -> DfsResult<()> {
        let guard = self.scope_base()?;
        let result = f();
        guard.unscope();
        result
    }
}

thread_local! {
    static VIRTUAL_IDENTITY: Cell<Option<Identity>> = const { Cell::new(None) };
}

/// Mapper that never touches OS credentials.
///
/// Scopes are tracked per thread so callers can still observe the
/// identity they would run as.
#[derive(Debug, Clone)]
pub struct NullMapper {
    base: Identity,
}

impl NullMapper {
    pub fn new() -> Self {
        Self {
            base: Identity::process(),
        }
    }
}

impl Default for NullMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl UserMapper for NullMapper {
    fn current_identity(&self) -> Identity {
        VIRTUAL_IDENTITY.with(|id| id.get()).unwrap_or(self.base)
    }

    fn base_identity(&self) -> Identity {
        self.base
    }

    fn scope_user_by_ids(&self, uid: u32, gid: u32) -> DfsResult<ScopeGuard> {
        let previous = VIRTUAL_IDENTITY.with(|id| id.replace(Some(Identity { uid, gid })));
        Ok(ScopeGuard::new(move || {
            VIRTUAL_IDENTITY.with(|id| id.set(previous));
        }))
    }
}

/// Switches the thread's fs uid/gid with `setfsuid(2)`/`setfsgid(2)`.
///
/// Switching to another user requires `CAP_SETUID`/`CAP_SETGID`; without
/// them the kernel keeps the current ids and the scope fails with
/// `PermissionDenied`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct UnixMapper {
    base: Identity,
}

#[cfg(target_os = "linux")]
impl UnixMapper {
    pub fn new() -> Self {
        Self {
            base: Identity::process(),
        }
    }

    // setfsuid/setfsgid only report the previous value; passing an invalid
    // id (-1) queries without changing anything.
    fn fsuid() -> u32 {
        use nix::unistd::{Uid, setfsuid};
        setfsuid(Uid::from_raw(u32::MAX)).as_raw()
    }

    fn fsgid() -> u32 {
        use nix::unistd::{Gid, setfsgid};
        setfsgid(Gid::from_raw(u32::MAX)).as_raw()
    }

    fn switch(uid: u32, gid: u32) -> Identity {
        use nix::unistd::{Gid, Uid, setfsgid, setfsuid};
        // gid first: dropping the uid may drop the right to change the gid
        let prev_gid = setfsgid(Gid::from_raw(gid)).as_raw();
        let prev_uid = setfsuid(Uid::from_raw(uid)).as_raw();
        Identity {
            uid: prev_uid,
            gid: prev_gid,
        }
    }

    fn restore(previous: Identity) {
        use nix::unistd::{Gid, Uid, setfsgid, setfsuid};
        setfsuid(Uid::from_raw(previous.uid));
        setfsgid(Gid::from_raw(previous.gid));
        if Self::fsuid() != previous.uid || Self::fsgid() != previous.gid {
            error!(
                uid = previous.uid,
                gid = previous.gid,
                "failed to restore fs identity"
            );
        }
    }
}

#[cfg(target_os = "linux")]
impl Default for UnixMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl UserMapper for UnixMapper {
    fn current_identity(&self) -> Identity {
        Identity {
            uid: Self::fsuid(),
            gid: Self::fsgid(),
        }
    }

    fn base_identity(&self) -> Identity {
        self.base
    }

    fn scope_user_by_ids(&self, uid: u32, gid: u32) -> DfsResult<ScopeGuard> {
        let previous = Self::switch(uid, gid);
        if Self::fsuid() != uid || Self::fsgid() != gid {
            Self::restore(previous);
            return Err(DfsError::PermissionDenied(format!(
                "cannot switch fs identity to {uid}:{gid}"
            )));
        }
        debug!(uid, gid, "scoped fs identity");
        Ok(ScopeGuard::new(move || Self::restore(previous)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::User;

    #[test]
    fn guard_restores_after_failed_operation() {
        let mapper = NullMapper::new();
        let base = mapper.current_identity();

        let outcome: DfsResult<()> = (|| {
            let _guard = mapper.scope_user_by_ids(4242, 4343)?;
            assert_eq!(
                mapper.current_identity(),
                Identity {
                    uid: 4242,
                    gid: 4343
                }
            );
            Err(DfsError::io("write", std::io::Error::other("disk full")))
        })();

        assert!(outcome.is_err());
        assert_eq!(mapper.current_identity(), base);
    }

    #[test]
    fn guard_restores_on_panic() {
        let mapper = NullMapper::new();
        let base = mapper.current_identity();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = mapper.scope_user_by_ids(1, 1).unwrap();
            panic!("operation blew up");
        }));
        assert!(result.is_err());
        assert_eq!(mapper.current_identity(), base);
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let mapper = NullMapper::new();
        let outer = mapper.scope_user_by_ids(10, 10).unwrap();
        {
            let _inner = mapper.scope_base().unwrap();
            assert_eq!(mapper.current_identity(), mapper.base_identity());
        }
        assert_eq!(mapper.current_identity(), Identity { uid: 10, gid: 10 });
        outer.unscope();
        assert_eq!(mapper.current_identity(), mapper.base_identity());
    }

    #[test]
    fn scope_user_requires_ids() {
        let mapper = NullMapper::new();
        let ctx = RequestContext::for_user(User::new("alice"));
        let err = mapper.scope_user(&ctx).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

        let ctx = RequestContext::for_user(User::new("alice").with_ids(7, 8));
        let _guard = mapper.scope_user(&ctx).unwrap();
        assert_eq!(mapper.current_identity(), Identity { uid: 7, gid: 8 });
    }

    #[test]
    fn run_in_base_scope_restores_user() {
        let mapper = NullMapper::new();
        let _user = mapper.scope_user_by_ids(5, 6).unwrap();
        let mut seen = None;
        mapper
            .run_in_base_scope(&mut || {
                seen = Some(mapper.current_identity());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(mapper.base_identity()));
        assert_eq!(mapper.current_identity(), Identity { uid: 5, gid: 6 });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unix_mapper_can_scope_to_own_identity() {
        let mapper = UnixMapper::new();
        let base = mapper.base_identity();
        let guard = mapper.scope_user_by_ids(base.uid, base.gid).unwrap();
        assert_eq!(mapper.current_identity(), base);
        guard.unscope();
        assert_eq!(mapper.current_identity(), base);
    }
}
