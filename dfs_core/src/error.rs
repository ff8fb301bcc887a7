use thiserror::Error;

/// Closed classification of every [`DfsError`].
///
/// Callers branch on the kind instead of matching individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BlobNotFound,
    AlreadyExists,
    PermissionDenied,
    NotInitialized,
    IoFailure,
    InvalidArgument,
    NotSupported,
}

#[derive(Debug, Error)]
pub enum DfsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("blob not found: {0}")]
    BlobNotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not initialized: {0}")]
    NotInitialized(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type DfsResult<T> = std::result::Result<T, DfsError>;

impl DfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DfsError::NotFound(_) => ErrorKind::NotFound,
            DfsError::BlobNotFound(_) => ErrorKind::BlobNotFound,
            DfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DfsError::NotInitialized(_) => ErrorKind::NotInitialized,
            DfsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DfsError::NotSupported(_) => ErrorKind::NotSupported,
            DfsError::Io { .. } | DfsError::Corrupt(_) | DfsError::Backend(_) => {
                ErrorKind::IoFailure
            }
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DfsError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Attaches a context string to `std::io::Result`s.
pub trait IoResultExt<T> {
    fn io_context<F, S>(self, context: F) -> DfsResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<F, S>(self, context: F) -> DfsResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| DfsError::io(context(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_classify_as_io() {
        assert_eq!(
            DfsError::Corrupt("bad cbor".into()).kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(
            DfsError::Backend("db locked".into()).kind(),
            ErrorKind::IoFailure
        );
        let io = std::io::Error::other("disk gone");
        assert_eq!(DfsError::io("write blob", io).kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn blob_not_found_is_distinct_from_not_found() {
        let err = DfsError::BlobNotFound("b1".into());
        assert_eq!(err.kind(), ErrorKind::BlobNotFound);
        assert!(!err.is_not_found());
    }
}
