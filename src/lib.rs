//! # Wipeout
//!
//! Reclaims the disk space of build workspaces without making the caller wait
//! for the delete.
//!
//! A wipeout happens in two phases. The workspace is first renamed out of the
//! way on its node so the slot can be reused immediately, then the renamed
//! directory is handed to a durable disposal queue that keeps retrying the
//! delete across node outages and process restarts.
//!
//! ## Usage
//!
//! ```bash
//! wipeout wipe /jobs/foo/workspace --node agent-1
//! wipeout dispose
//! ```
//!
//! ## Modules
//!
//! - `app` - Logging setup and fatal error reporting for the binary
//! - `config` - TOML configuration with environment overrides
//! - `controller` - Process-wide controller lifecycle (installed / shut down)
//! - `disposal` - Durable, retrying queue of disposal tasks
//! - `error` - Crate-level error type
//! - `node` - Execution nodes, channels and node-bound file handles
//! - `wipeout` - Workspace detachment and the remote delete task
//! - `testing` - Mock channels and sinks for tests
pub mod app;
pub mod config;
pub mod controller;
pub mod disposal;
pub mod error;
pub mod node;
pub mod wipeout;

pub mod testing;

pub use error::{Error, Result};
