use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::channel::{LocalChannel, NodeChannel};

/// A path on a node together with the channel that reaches it
#[derive(Clone)]
pub struct FilePath {
    channel: Arc<dyn NodeChannel>,
    remote: PathBuf,
}

impl FilePath {
    pub fn new(channel: Arc<dyn NodeChannel>, remote: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            remote: remote.into(),
        }
    }

    /// Path on the local filesystem of this process
    pub fn local(remote: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(LocalChannel), remote)
    }

    /// The path as seen by the node
    pub fn remote(&self) -> &Path {
        &self.remote
    }

    /// Final path component, or the whole path when it has none
    pub fn name(&self) -> String {
        self.remote
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.remote.display().to_string())
    }

    pub fn channel(&self) -> &Arc<dyn NodeChannel> {
        &self.channel
    }

    /// Sibling path on the same node with `suffix` appended to the last component
    pub fn with_suffix(&self, suffix: &str) -> FilePath {
        // Re-collecting the components drops a trailing separator
        let normalized: PathBuf = self.remote.components().collect();
        let mut raw = normalized.into_os_string();
        raw.push(suffix);
        Self::new(Arc::clone(&self.channel), PathBuf::from(raw))
    }

    pub async fn rename_to(&self, target: &FilePath) -> io::Result<()> {
        self.channel.rename(&self.remote, &target.remote).await
    }

    pub async fn delete_recursive(&self) -> io::Result<()> {
        self.channel.delete_recursive(&self.remote).await
    }

    pub async fn exists(&self) -> io::Result<bool> {
        self.channel.exists(&self.remote).await
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePath")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_suffix_appends_to_last_component() {
        let ws = FilePath::local("/jobs/foo/workspace");
        let detached = ws.with_suffix("_wipeout_1700000000000");

        assert_eq!(
            detached.remote(),
            Path::new("/jobs/foo/workspace_wipeout_1700000000000")
        );
        assert_eq!(detached.name(), "workspace_wipeout_1700000000000");
    }

    #[test]
    fn test_with_suffix_ignores_trailing_separator() {
        let ws = FilePath::local("/jobs/foo/workspace/");
        let detached = ws.with_suffix("_old");

        assert_eq!(detached.remote(), Path::new("/jobs/foo/workspace_old"));
    }

    #[test]
    fn test_with_suffix_keeps_channel() {
        let ws = FilePath::local("/jobs/foo/workspace");
        let detached = ws.with_suffix("_x");

        assert!(Arc::ptr_eq(ws.channel(), detached.channel()));
    }
}
