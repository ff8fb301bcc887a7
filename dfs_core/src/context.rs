/// Authenticated user on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uid: None,
            gid: None,
        }
    }

    pub fn with_ids(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// Per-request caller identity.
///
/// The executant is whoever actually triggered the operation (e.g. an
/// admin acting for a user); it defaults to the user.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub user: User,
    pub executant: Option<User>,
}

impl RequestContext {
    pub fn for_user(user: User) -> Self {
        Self {
            user,
            executant: None,
        }
    }

    pub fn with_executant(mut self, executant: User) -> Self {
        self.executant = Some(executant);
        self
    }

    /// Subject string used for permission checks.
    pub fn subject(&self) -> &str {
        &self.user.id
    }

    pub fn executant(&self) -> &User {
        self.executant.as_ref().unwrap_or(&self.user)
    }
}
