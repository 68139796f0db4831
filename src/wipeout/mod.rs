//! Workspace wipeout
//!
//! Wiping a workspace renames it to a sibling path on its node and queues the
//! renamed directory for asynchronous deletion, so the workspace slot is free
//! again as soon as the rename is confirmed. When renaming is impossible the
//! workspace is deleted inline instead.

mod task;

pub use task::RemoteDeleteTask;

use chrono::Utc;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::disposal::{DisposableKinds, DisposalSink};
use crate::node::{FilePath, NodeRegistry};

/// Marker placed between the workspace name and the detach timestamp
pub const DEFAULT_SUFFIX_MARKER: &str = "_wipeout_";

/// Errors a caller of [`Wipeout::perform`] can observe
#[derive(Error, Debug)]
pub enum WipeoutError {
    #[error("Failed to delete workspace {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to verify detached workspace {path}: {source}")]
    Verify {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A build workspace and the node it belongs to
#[derive(Debug, Clone)]
pub struct Workspace {
    node: String,
    path: FilePath,
}

impl Workspace {
    /// `path` is the handle the caller used for the workspace; it is only
    /// relied upon when the owning node can no longer be resolved.
    pub fn new(node: impl Into<String>, path: FilePath) -> Self {
        Self {
            node: node.into(),
            path,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn path(&self) -> &FilePath {
        &self.path
    }
}

/// Detaches workspaces and hands them to a disposal sink
pub struct Wipeout {
    registry: Arc<dyn NodeRegistry>,
    sink: Arc<dyn DisposalSink>,
    suffix_marker: String,
}

impl Wipeout {
    pub fn new(registry: Arc<dyn NodeRegistry>, sink: Arc<dyn DisposalSink>) -> Self {
        Self {
            registry,
            sink,
            suffix_marker: DEFAULT_SUFFIX_MARKER.to_string(),
        }
    }

    pub fn with_suffix_marker(mut self, marker: impl Into<String>) -> Self {
        self.suffix_marker = marker.into();
        self
    }

    /// Sibling path the workspace is moved to: `<workspace><marker><epoch millis>`
    pub fn wipeout_path(&self, workspace: &FilePath) -> FilePath {
        workspace.with_suffix(&format!(
            "{}{}",
            self.suffix_marker,
            Utc::now().timestamp_millis()
        ))
    }

    /// Make the workspace path unusable and arrange for its contents to be
    /// deleted.
    ///
    /// Returns once the workspace has been renamed away or deleted. Only
    /// failures of this synchronous part are reported; the queued delete
    /// never reports back.
    pub async fn perform(&self, workspace: &Workspace) -> Result<(), WipeoutError> {
        let ws = workspace.path();
        let delete_me = self.wipeout_path(ws);

        let Some(node) = self.registry.resolve(workspace.node()) else {
            debug!(
                node = workspace.node(),
                "Owning node is gone, deleting {} inline", ws
            );
            return delete_inline(ws).await;
        };

        let detached = match ws.rename_to(&delete_me).await {
            Ok(()) => delete_me
                .exists()
                .await
                .map_err(|source| WipeoutError::Verify {
                    path: delete_me.remote().to_path_buf(),
                    source,
                })?,
            Err(e) => {
                debug!("Rename of {} failed: {}", ws, e);
                false
            }
        };

        if !detached {
            warn!(
                "Cleaning workspace synchronously. Failed to rename {} to {}.",
                ws,
                delete_me.name()
            );
            return delete_inline(ws).await;
        }

        let task = RemoteDeleteTask::new(node.name(), delete_me.remote());
        self.sink.submit(Box::new(task)).await;
        info!(node = node.name(), "Detached {} to {}", ws, delete_me.name());
        Ok(())
    }
}

async fn delete_inline(path: &FilePath) -> Result<(), WipeoutError> {
    path.delete_recursive()
        .await
        .map_err(|source| WipeoutError::Delete {
            path: path.remote().to_path_buf(),
            source,
        })
}

/// Task kinds created by wipeouts, for reviving a [`crate::disposal::DisposalQueue`]
pub fn disposable_kinds() -> DisposableKinds {
    DisposableKinds::new().with(RemoteDeleteTask::KIND, RemoteDeleteTask::revive)
}
