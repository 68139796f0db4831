use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::node::{remote_failure, LocalChannel, NodeChannel};

/// A filesystem operation seen by a [`MockChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Rename { from: PathBuf, to: PathBuf },
    Delete(PathBuf),
    Exists(PathBuf),
}

#[derive(Debug, Clone)]
enum DeleteFailure {
    Io(String),
    Remote(String),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ChannelCall>,
    fail_renames: bool,
    spoof_renames: bool,
    fail_exists: bool,
    delete_failures: Vec<DeleteFailure>,
    silent_deletes: usize,
}

/// Channel backed by the local filesystem that records every call and can
/// be told to misbehave
#[derive(Debug, Default)]
pub struct MockChannel {
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every rename returns an error
    pub fn failing_renames(self) -> Self {
        self.state().fail_renames = true;
        self
    }

    /// Every rename reports success without moving anything
    pub fn spoofed_renames(self) -> Self {
        self.state().spoof_renames = true;
        self
    }

    /// Every existence check returns an error
    pub fn failing_exists(self) -> Self {
        self.state().fail_exists = true;
        self
    }

    /// The next `times` deletes fail with a plain I/O error
    pub fn failing_deletes(self, times: usize, message: &str) -> Self {
        self.push_delete_failures(times, DeleteFailure::Io(message.to_string()))
    }

    /// The next `times` deletes fail with a transport-wrapped remote error
    pub fn remote_failing_deletes(self, times: usize, message: &str) -> Self {
        self.push_delete_failures(times, DeleteFailure::Remote(message.to_string()))
    }

    /// The next `times` deletes report success but leave the path in place
    pub fn silent_deletes(self, times: usize) -> Self {
        self.state().silent_deletes += times;
        self
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.state().calls.clone()
    }

    pub fn delete_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, ChannelCall::Delete(_)))
            .count()
    }

    fn push_delete_failures(self, times: usize, failure: DeleteFailure) -> Self {
        self.state()
            .delete_failures
            .extend(std::iter::repeat(failure).take(times));
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NodeChannel for MockChannel {
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let (fail, spoof) = {
            let mut state = self.state();
            state.calls.push(ChannelCall::Rename {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
            });
            (state.fail_renames, state.spoof_renames)
        };

        if fail {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "rename rejected by mock",
            ));
        }
        if spoof {
            return Ok(());
        }
        LocalChannel.rename(from, to).await
    }

    async fn delete_recursive(&self, path: &Path) -> io::Result<()> {
        let (failure, silent) = {
            let mut state = self.state();
            state.calls.push(ChannelCall::Delete(path.to_path_buf()));
            let failure = if state.delete_failures.is_empty() {
                None
            } else {
                Some(state.delete_failures.remove(0))
            };
            let silent = failure.is_none() && state.silent_deletes > 0;
            if silent {
                state.silent_deletes -= 1;
            }
            (failure, silent)
        };

        match failure {
            Some(DeleteFailure::Io(message)) => Err(io::Error::other(message)),
            Some(DeleteFailure::Remote(message)) => Err(remote_failure(message)),
            None if silent => Ok(()),
            None => LocalChannel.delete_recursive(path).await,
        }
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        let fail = {
            let mut state = self.state();
            state.calls.push(ChannelCall::Exists(path.to_path_buf()));
            state.fail_exists
        };

        if fail {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "channel closed during exists check",
            ));
        }
        LocalChannel.exists(path).await
    }
}
