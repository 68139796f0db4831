//! Testing utilities
//!
//! Mock collaborators for exercising wipeouts and disposal without a real
//! remote node: a channel that records calls and injects failures, and a
//! sink that captures submitted tasks instead of queueing them.

pub mod mocks;

pub use mocks::{ChannelCall, MockChannel, RecordingSink};
