//! Execution nodes and the filesystem handles bound to them
//!
//! A node is a machine that runs builds. Every filesystem operation on a node
//! goes through its [`NodeChannel`]; a [`FilePath`] pairs a channel with a path
//! on that node. Nodes are looked up by name through a [`NodeRegistry`], and
//! the controller itself is the node with the empty name.

mod channel;
mod file_path;
mod registry;

pub use channel::{
    remote_failure, unwrap_remote_failure, LocalChannel, NodeChannel, RemoteFailure,
    REMOTE_FAILURE_PREFIX,
};
pub use file_path::FilePath;
pub use registry::{Node, NodeRegistry, StaticRegistry, CONTROLLER_NODE};
