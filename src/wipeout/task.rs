//! Deferred deletion of a detached workspace

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::controller::Controller;
use crate::disposal::{Disposable, DisposalError, DisposalState};
use crate::node::{unwrap_remote_failure, CONTROLLER_NODE};

/// Deletes `path` on the node called `node`.
///
/// Only the node name and path are stored. Every attempt resolves the node
/// again, because its connection may have been replaced, or the node removed,
/// since the task was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDeleteTask {
    node: String,
    path: PathBuf,
}

impl RemoteDeleteTask {
    pub const KIND: &'static str = "remote-delete";

    pub fn new(node: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            path: path.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn revive(payload: serde_json::Value) -> Result<Box<dyn Disposable>, serde_json::Error> {
        let task: RemoteDeleteTask = serde_json::from_value(payload)?;
        Ok(Box::new(task))
    }
}

#[async_trait]
impl Disposable for RemoteDeleteTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn display_name(&self) -> String {
        let node = if self.node == CONTROLLER_NODE {
            "controller"
        } else {
            self.node.as_str()
        };
        format!("Workspace {}:{}", node, self.path.display())
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    async fn dispose(
        &self,
        controller: Option<&Controller>,
    ) -> Result<DisposalState, DisposalError> {
        // Going down, or not up yet
        let Some(controller) = controller else {
            return Ok(DisposalState::Pending);
        };

        let Some(node) = controller.resolve_node(&self.node) else {
            // Removed or discarded machine; nothing left to delete
            info!(
                node = self.node.as_str(),
                "Node no longer exists, dropping deletion of {}",
                self.path.display()
            );
            return Ok(DisposalState::Purged);
        };

        let ws = node.file_path(&self.path);
        ws.delete_recursive().await.map_err(|e| match unwrap_remote_failure(e) {
            Ok(cause) => DisposalError::Remote(cause),
            Err(e) => DisposalError::Io(e),
        })?;

        if ws.exists().await? {
            debug!("{} survived deletion, will retry", ws);
            Ok(DisposalState::Pending)
        } else {
            Ok(DisposalState::Purged)
        }
    }
}
