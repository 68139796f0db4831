//! Lookup of live nodes by name

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use super::channel::{LocalChannel, NodeChannel};
use super::file_path::FilePath;

/// Name under which the controller registers itself
pub const CONTROLLER_NODE: &str = "";

/// A connected node and the channel reaching it
#[derive(Clone)]
pub struct Node {
    name: String,
    channel: Arc<dyn NodeChannel>,
}

impl Node {
    pub fn new(name: impl Into<String>, channel: Arc<dyn NodeChannel>) -> Self {
        Self {
            name: name.into(),
            channel,
        }
    }

    /// The controller itself, reached through the local filesystem
    pub fn controller() -> Self {
        Self::new(CONTROLLER_NODE, Arc::new(LocalChannel))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_controller(&self) -> bool {
        self.name == CONTROLLER_NODE
    }

    pub fn channel(&self) -> &Arc<dyn NodeChannel> {
        &self.channel
    }

    /// Fresh handle to `path` on this node
    pub fn file_path(&self, path: impl Into<PathBuf>) -> FilePath {
        FilePath::new(Arc::clone(&self.channel), path)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("name", &self.name).finish()
    }
}

/// Resolves node names to currently connected nodes
pub trait NodeRegistry: Send + Sync {
    /// `None` when no node of that name is known any more
    fn resolve(&self, name: &str) -> Option<Node>;
}

/// In-memory registry with an explicit set of nodes
#[derive(Default)]
pub struct StaticRegistry {
    nodes: RwLock<HashMap<String, Node>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing only the controller node
    pub fn with_controller() -> Self {
        let registry = Self::new();
        registry.insert(Node::controller());
        registry
    }

    /// Controller plus one locally reachable node per name
    pub fn with_local_nodes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::with_controller();
        for name in names {
            registry.insert(Node::new(name, Arc::new(LocalChannel)));
        }
        registry
    }

    /// Register a node, replacing any node of the same name
    pub fn insert(&self, node: Node) -> Option<Node> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.name.clone(), node)
    }

    /// Forget a node; later lookups of its name fail
    pub fn remove(&self, name: &str) -> Option<Node> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl NodeRegistry for StaticRegistry {
    fn resolve(&self, name: &str) -> Option<Node> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
