//! Durable disposal of resources that could not be released inline
//!
//! A [`Disposable`] knows how to release one resource and reports after each
//! attempt whether the resource is gone ([`DisposalState::Purged`]) or must be
//! tried again ([`DisposalState::Pending`]). Errors returned from an attempt
//! are transient failures; the [`DisposalQueue`] persists every task, retries
//! it with backoff and forgets it only once it is purged or discarded.

mod claim;
mod kinds;
mod queue;
mod retry;
mod storage;

pub use claim::DisposalClaim;
pub use kinds::{DisposableKinds, Reviver};
pub use queue::{DisposalQueue, PendingDisposal, ProcessSummary};
pub use retry::Backoff;
pub use storage::{DisposalRecord, DisposalStorage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::controller::Controller;

/// Outcome of a single disposal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalState {
    /// Resource still present; attempt again later
    Pending,
    /// Resource is gone for good
    Purged,
}

/// Transient failure of a disposal attempt
#[derive(Error, Debug)]
pub enum DisposalError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Failure raised on a remote node, already unwrapped from its transport
    #[error("{0}")]
    Remote(Box<dyn StdError + Send + Sync>),
}

impl DisposalError {
    /// The error that actually caused the attempt to fail
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        match self {
            Self::Io(e) => e,
            Self::Remote(cause) => cause.as_ref(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Errors of the queue's own bookkeeping
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown disposable kind: {0}")]
    UnknownKind(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A resource release that may need several attempts
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Stable tag used to revive the task from storage
    fn kind(&self) -> &'static str;

    /// Operator-facing label
    fn display_name(&self) -> String;

    /// Durable identity of the task, enough to revive it after a restart
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Make one attempt. `controller` is `None` while the process is starting
    /// up or shutting down.
    async fn dispose(&self, controller: Option<&Controller>)
        -> Result<DisposalState, DisposalError>;
}

/// Destination for disposal tasks. Submission never fails from the caller's
/// point of view.
#[async_trait]
pub trait DisposalSink: Send + Sync {
    async fn submit(&self, task: Box<dyn Disposable>);
}
