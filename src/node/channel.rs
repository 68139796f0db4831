//! Channels carrying filesystem operations to a node

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::Path;
use tokio::fs;

/// Message prefix of I/O errors that wrap a failure raised on the remote side
pub const REMOTE_FAILURE_PREFIX: &str = "remote file operation failed:";

/// Filesystem operations executed on a node
#[async_trait]
pub trait NodeChannel: Send + Sync + fmt::Debug {
    /// Move `from` to `to` on the node
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete a directory tree or a single file; a missing path is not an error
    async fn delete_recursive(&self, path: &Path) -> io::Result<()>;

    /// Check whether anything exists at `path`
    async fn exists(&self, path: &Path) -> io::Result<bool>;
}

/// Failure raised on the far end of a channel, carried over the transport
#[derive(Debug)]
pub struct RemoteFailure {
    cause: Box<dyn StdError + Send + Sync>,
}

impl RemoteFailure {
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn into_cause(self) -> Box<dyn StdError + Send + Sync> {
        self.cause
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", REMOTE_FAILURE_PREFIX, self.cause)
    }
}

impl StdError for RemoteFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Wrap a remote-side failure the way channel transports report it
pub fn remote_failure<E>(cause: E) -> io::Error
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    io::Error::other(RemoteFailure {
        cause: cause.into(),
    })
}

/// Split a transport-wrapped remote failure into its underlying cause.
///
/// Returns `Ok(cause)` when `err` is a [`RemoteFailure`] announced by
/// [`REMOTE_FAILURE_PREFIX`], otherwise hands `err` back unchanged.
pub fn unwrap_remote_failure(
    err: io::Error,
) -> Result<Box<dyn StdError + Send + Sync>, io::Error> {
    let wrapped = err.to_string().starts_with(REMOTE_FAILURE_PREFIX)
        && err
            .get_ref()
            .is_some_and(|inner| inner.is::<RemoteFailure>());
    if !wrapped {
        return Err(err);
    }

    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<RemoteFailure>() {
            Ok(failure) => Ok(failure.into_cause()),
            Err(inner) => Err(io::Error::new(kind, inner)),
        },
        None => Err(io::Error::from(kind)),
    }
}

/// Channel operating on the local filesystem of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChannel;

#[async_trait]
impl NodeChannel for LocalChannel {
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if fs::try_exists(to).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("rename target {} already exists", to.display()),
            ));
        }
        fs::rename(from, to).await
    }

    async fn delete_recursive(&self, path: &Path) -> io::Result<()> {
        let result = match fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
            Ok(_) => fs::remove_file(path).await,
            Err(e) => Err(e),
        };

        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }
}
