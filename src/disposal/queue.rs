//! The durable disposal queue
//!
//! Tasks are kept in memory for execution and mirrored to [`DisposalStorage`]
//! so that a restarted process picks up where the previous one stopped. A
//! task that is running is never handed out again until its attempt settles.
//!
//! Several processes may open queues on the same storage directory. Every
//! pass reloads storage to adopt tasks submitted elsewhere, and a stored task
//! is only attempted while holding its [`DisposalClaim`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::claim::DisposalClaim;
use super::kinds::DisposableKinds;
use super::retry::Backoff;
use super::storage::{DisposalRecord, DisposalStorage};
use super::{Disposable, DisposalError, DisposalSink, DisposalState, QueueError};
use crate::config::{QueueConfig, MAX_RETRY_DELAY};
use crate::controller::ControllerSlot;

struct QueueEntry {
    record: DisposalRecord,
    task: Arc<dyn Disposable>,
    running: bool,
    /// The record has been written to storage at least once
    stored: bool,
}

/// Operator view of a queued task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDisposal {
    pub id: Uuid,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Counts of attempt outcomes from one pass over the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub purged: usize,
    pub pending: usize,
    pub failed: usize,
}

impl ProcessSummary {
    pub fn attempted(&self) -> usize {
        self.purged + self.pending + self.failed
    }
}

enum Settled {
    Purged,
    Pending,
    Failed,
    /// Not attempted: discarded, claimed elsewhere, or finished elsewhere
    Skipped,
}

/// Persisted set of pending disposals with retrying execution
pub struct DisposalQueue {
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
    storage: DisposalStorage,
    kinds: DisposableKinds,
    backoff: Backoff,
    max_concurrent: usize,
    poll_interval: Duration,
    claim_ttl: Duration,
    slot: ControllerSlot,
    wake: Notify,
}

impl DisposalQueue {
    /// Open the queue stored under `storage_dir`, reviving every persisted task
    pub async fn open(
        storage_dir: &Path,
        config: &QueueConfig,
        kinds: &DisposableKinds,
        slot: ControllerSlot,
    ) -> Result<Self, QueueError> {
        let storage = DisposalStorage::new(storage_dir.join("disposal"));

        let mut entries = HashMap::new();
        for record in storage.load_all().await? {
            let id = record.id;
            let display_name = record.display_name.clone();
            match revive(kinds, record) {
                Ok(entry) => {
                    entries.insert(id, entry);
                }
                Err(e) => {
                    error!(
                        "Cannot revive disposal {} ({}); leaving it in storage: {}",
                        id, display_name, e
                    );
                }
            }
        }

        if !entries.is_empty() {
            info!("Resuming {} pending disposal(s)", entries.len());
        }

        Ok(Self {
            entries: RwLock::new(entries),
            storage,
            kinds: kinds.clone(),
            backoff: Backoff::new(config.retry.clone()),
            max_concurrent: config.max_concurrent.max(1),
            poll_interval: config.poll_interval,
            claim_ttl: config.claim_ttl,
            slot,
            wake: Notify::new(),
        })
    }

    /// Add a task unless an identical one is already queued.
    ///
    /// Returns the id of the new entry, or `None` for a duplicate. A task whose
    /// record cannot be written stays queued in memory.
    pub async fn enqueue(
        &self,
        task: Box<dyn Disposable>,
    ) -> Result<Option<Uuid>, QueueError> {
        let kind = task.kind();
        let payload = task.to_payload()?;

        let mut entries = self.entries.write().await;
        if entries
            .values()
            .any(|entry| entry.record.kind == kind && entry.record.payload == payload)
        {
            debug!("Disposal {} is already queued", task.display_name());
            return Ok(None);
        }

        let now = Utc::now();
        let record = DisposalRecord {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            payload,
            display_name: task.display_name(),
            registered_at: now,
            attempts: 0,
            last_attempt: None,
            next_attempt_at: now,
            last_error: None,
        };
        let id = record.id;

        let persisted = self.storage.persist(&record).await;
        info!("Queued disposal of {}", record.display_name);
        entries.insert(
            id,
            QueueEntry {
                record,
                task: Arc::from(task),
                running: false,
                stored: persisted.is_ok(),
            },
        );
        drop(entries);

        self.wake.notify_one();
        persisted.map(|()| Some(id))
    }

    /// Snapshot of every queued task, oldest first
    pub async fn pending(&self) -> Vec<PendingDisposal> {
        let entries = self.entries.read().await;
        let mut pending: Vec<PendingDisposal> = entries
            .values()
            .map(|entry| PendingDisposal {
                id: entry.record.id,
                display_name: entry.record.display_name.clone(),
                registered_at: entry.record.registered_at,
                attempts: entry.record.attempts,
                next_attempt_at: entry.record.next_attempt_at,
                last_error: entry.record.last_error.clone(),
            })
            .collect();
        pending.sort_by_key(|p| p.registered_at);
        pending
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop a task without disposing of it (operator decision)
    pub async fn discard(&self, id: Uuid) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .remove(&id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        self.storage.remove(id).await?;
        warn!("Discarded disposal of {}", entry.record.display_name);
        Ok(())
    }

    /// Run one attempt of every task that is due
    pub async fn process_due(&self) -> ProcessSummary {
        self.refresh().await;

        let due: Vec<(Uuid, Arc<dyn Disposable>, bool)> = {
            let now = Utc::now();
            let mut entries = self.entries.write().await;
            entries
                .iter_mut()
                .filter(|(_, entry)| !entry.running && entry.record.next_attempt_at <= now)
                .map(|(id, entry)| {
                    entry.running = true;
                    (*id, Arc::clone(&entry.task), entry.stored)
                })
                .collect()
        };

        if due.is_empty() {
            return ProcessSummary::default();
        }
        debug!("Processing {} due disposal(s)", due.len());

        let attempts: Vec<_> = due
            .into_iter()
            .map(|(id, task, stored)| self.attempt(id, task, stored))
            .collect();
        let outcomes: Vec<Settled> = stream::iter(attempts)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut summary = ProcessSummary::default();
        for outcome in outcomes {
            match outcome {
                Settled::Purged => summary.purged += 1,
                Settled::Pending => summary.pending += 1,
                Settled::Failed => summary.failed += 1,
                Settled::Skipped => {}
            }
        }
        summary
    }

    /// Adopt what other processes changed in storage. New records become
    /// entries, idle entries take the stored version of their record, and idle
    /// entries whose record is gone were finished elsewhere.
    async fn refresh(&self) {
        let mut entries = self.entries.write().await;
        let records = match self.storage.load_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to reload disposal records: {}", e);
                return;
            }
        };

        let on_disk: HashSet<Uuid> = records.iter().map(|record| record.id).collect();
        entries.retain(|id, entry| entry.running || !entry.stored || on_disk.contains(id));

        for record in records {
            if let Some(entry) = entries.get_mut(&record.id) {
                if !entry.running {
                    entry.record = record;
                }
                continue;
            }

            let id = record.id;
            match revive(&self.kinds, record) {
                Ok(entry) => {
                    info!("Adopted disposal of {}", entry.record.display_name);
                    entries.insert(id, entry);
                }
                Err(e) => debug!("Skipping disposal {}: {}", id, e),
            }
        }
    }

    /// One attempt of a task already marked running
    async fn attempt(&self, id: Uuid, task: Arc<dyn Disposable>, stored: bool) -> Settled {
        // Only stored tasks are visible to other processes
        let claim = if stored {
            match self.claim(id).await {
                Some(claim) => Some(claim),
                None => return Settled::Skipped,
            }
        } else {
            None
        };

        let controller = self.slot.current();
        let outcome = task.dispose(controller.as_deref()).await;
        let settled = self.settle(id, outcome).await;

        if let Some(claim) = claim {
            release(id, claim).await;
        }
        settled
    }

    /// Claim a stored task and confirm it is still due. On `None` the entry is
    /// idle again, or forgotten when its record no longer exists.
    async fn claim(&self, id: Uuid) -> Option<DisposalClaim> {
        let claim = match self.storage.claim(id, self.claim_ttl).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                debug!("Disposal {} is being attempted by another process", id);
                self.set_idle(id, None).await;
                return None;
            }
            Err(e) => {
                warn!("Failed to claim disposal {}: {}", id, e);
                self.set_idle(id, None).await;
                return None;
            }
        };

        match self.storage.load(id).await {
            Ok(Some(record)) if record.next_attempt_at <= Utc::now() => Some(claim),
            Ok(Some(record)) => {
                debug!("Disposal {} was rescheduled by another process", id);
                self.set_idle(id, Some(record)).await;
                release(id, claim).await;
                None
            }
            Ok(None) => {
                debug!("Disposal {} was finished by another process", id);
                self.entries.write().await.remove(&id);
                release(id, claim).await;
                None
            }
            Err(e) => {
                warn!("Failed to reload disposal {}: {}", id, e);
                self.set_idle(id, None).await;
                release(id, claim).await;
                None
            }
        }
    }

    async fn set_idle(&self, id: Uuid, record: Option<DisposalRecord>) {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.running = false;
            if let Some(record) = record {
                entry.record = record;
            }
        }
    }

    /// Record the outcome of an attempt
    async fn settle(
        &self,
        id: Uuid,
        outcome: Result<DisposalState, DisposalError>,
    ) -> Settled {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&id) else {
            return Settled::Skipped;
        };
        entry.running = false;

        let now = Utc::now();
        let (settled, error) = match outcome {
            Ok(DisposalState::Purged) => {
                let display_name = entry.record.display_name.clone();
                entries.remove(&id);
                if let Err(e) = self.storage.remove(id).await {
                    error!("Failed to remove record of disposal {}: {}", id, e);
                }
                info!("Disposed of {}", display_name);
                return Settled::Purged;
            }
            Ok(DisposalState::Pending) => (Settled::Pending, None),
            Err(e) => (Settled::Failed, Some(e)),
        };

        let record = &mut entry.record;
        record.attempts = record.attempts.saturating_add(1);
        record.last_attempt = Some(now);
        let delay = self.backoff.delay_for(record.attempts).min(MAX_RETRY_DELAY);
        record.next_attempt_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(30));

        match error {
            Some(e) => {
                warn!(
                    "Disposal of {} failed (attempt {}), retrying in {:?}: {}",
                    record.display_name, record.attempts, delay, e
                );
                record.last_error = Some(e.to_string());
            }
            None => {
                debug!(
                    "Disposal of {} still pending (attempt {}), retrying in {:?}",
                    record.display_name, record.attempts, delay
                );
            }
        }

        match self.storage.persist(record).await {
            Ok(()) => entry.stored = true,
            Err(e) => error!("Failed to persist disposal {}: {}", id, e),
        }
        settled
    }

    /// Time until the earliest idle task is due, bounded by the poll interval
    async fn next_wakeup(&self) -> Duration {
        let now = Utc::now();
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| !entry.running)
            .map(|entry| {
                (entry.record.next_attempt_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .min()
            .map_or(self.poll_interval, |due| due.min(self.poll_interval))
    }

    /// Keep processing due tasks until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Disposal worker started with {} queued task(s)", self.len().await);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let summary = self.process_due().await;
            if summary.attempted() > 0 {
                debug!(
                    purged = summary.purged,
                    pending = summary.pending,
                    failed = summary.failed,
                    "Disposal pass finished"
                );
            }

            let wait = self.next_wakeup().await;
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Disposal worker stopped");
    }
}

fn revive(kinds: &DisposableKinds, record: DisposalRecord) -> Result<QueueEntry, QueueError> {
    let task = kinds.revive(&record.kind, record.payload.clone())?;
    Ok(QueueEntry {
        record,
        task: Arc::from(task),
        running: false,
        stored: true,
    })
}

async fn release(id: Uuid, claim: DisposalClaim) {
    if let Err(e) = claim.release().await {
        warn!("Failed to release claim on disposal {}: {}", id, e);
    }
}

#[async_trait]
impl DisposalSink for DisposalQueue {
    async fn submit(&self, task: Box<dyn Disposable>) {
        let display_name = task.display_name();
        if let Err(e) = self.enqueue(task).await {
            error!("Failed to record disposal of {}: {}", display_name, e);
        }
    }
}
