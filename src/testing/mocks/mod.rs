//! Mock implementations for testing

pub mod channel;
pub mod sink;

pub use channel::{ChannelCall, MockChannel};
pub use sink::RecordingSink;
