//! Integration tests for workspace wipeout through the durable disposal queue
//!
//! These tests drive the public API end to end: a workspace is detached on a
//! node, the resulting task is persisted by a real queue, and the queue later
//! disposes of it, possibly after the process "restarts" or the node goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wipeout::config::{QueueConfig, RetrySettings};
use wipeout::controller::{Controller, ControllerSlot};
use wipeout::disposal::{DisposalQueue, ProcessSummary};
use wipeout::node::{FilePath, Node, StaticRegistry};
use wipeout::testing::MockChannel;
use wipeout::wipeout::{disposable_kinds, Wipeout, Workspace};

struct Env {
    temp_dir: TempDir,
    workspace_dir: PathBuf,
    registry: Arc<StaticRegistry>,
    slot: ControllerSlot,
}

impl Env {
    fn new(channel: Arc<MockChannel>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let workspace_dir = temp_dir.path().join("agent/jobs/foo/workspace");
        std::fs::create_dir_all(workspace_dir.join("target/release")).unwrap();
        std::fs::write(workspace_dir.join("target/release/app"), "binary").unwrap();
        std::fs::write(workspace_dir.join("Cargo.toml"), "[package]").unwrap();

        let registry = Arc::new(StaticRegistry::with_controller());
        registry.insert(Node::new("agent-1", channel));

        let slot = ControllerSlot::default();
        slot.install(Controller::new(registry.clone()));

        Self {
            temp_dir,
            workspace_dir,
            registry,
            slot,
        }
    }

    fn storage_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    async fn open_queue(&self) -> Arc<DisposalQueue> {
        Arc::new(
            DisposalQueue::open(
                &self.storage_dir(),
                &immediate_retry(),
                &disposable_kinds(),
                self.slot.clone(),
            )
            .await
            .unwrap(),
        )
    }

    fn workspace(&self, channel: Arc<MockChannel>) -> Workspace {
        Workspace::new("agent-1", FilePath::new(channel, &self.workspace_dir))
    }

    fn detached_dirs(&self) -> Vec<PathBuf> {
        detached_dirs(self.workspace_dir.parent().unwrap())
    }
}

fn detached_dirs(parent: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(parent)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("workspace_wipeout_")
        })
        .collect()
}

fn immediate_retry() -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_millis(20),
        max_concurrent: 4,
        claim_ttl: Duration::from_secs(3600),
        retry: RetrySettings {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 2.0,
            jitter: false,
            jitter_factor: 0.0,
        },
    }
}

/// Workspace on a live node is detached, queued, and later deleted.
#[tokio::test]
async fn test_wipeout_then_dispose() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());

    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();

    assert!(!env.workspace_dir.exists());
    let detached = env.detached_dirs();
    assert_eq!(detached.len(), 1);
    assert_eq!(channel.delete_count(), 0);

    let pending = queue.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].display_name,
        format!("Workspace agent-1:{}", detached[0].display())
    );

    let summary = queue.process_due().await;
    assert_eq!(
        summary,
        ProcessSummary {
            purged: 1,
            pending: 0,
            failed: 0
        }
    );
    assert!(!detached[0].exists());
    assert!(queue.is_empty().await);
}

/// The slot is free for a new workspace right after the wipeout returns.
#[tokio::test]
async fn test_workspace_slot_reusable_before_disposal() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());

    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();
    std::fs::create_dir_all(&env.workspace_dir).unwrap();
    std::fs::write(env.workspace_dir.join("fresh.txt"), "new build").unwrap();

    queue.process_due().await;

    assert!(env.workspace_dir.join("fresh.txt").exists());
    assert!(env.detached_dirs().is_empty());
}

/// A pending disposal survives a restart and is completed by the new process.
#[tokio::test]
async fn test_pending_disposal_survives_restart() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    {
        let queue = env.open_queue().await;
        let wipeout = Wipeout::new(env.registry.clone(), queue.clone());
        wipeout.perform(&env.workspace(channel.clone())).await.unwrap();
        // Process stops before the worker ever ran
        env.slot.shutdown();
    }
    let detached = env.detached_dirs();
    assert_eq!(detached.len(), 1);

    // Restart: node reconnects with a fresh channel
    let reconnected = Arc::new(MockChannel::new());
    env.registry.insert(Node::new("agent-1", reconnected.clone()));
    env.slot.install(Controller::new(env.registry.clone()));
    let queue = env.open_queue().await;
    assert_eq!(queue.len().await, 1);

    assert_eq!(queue.process_due().await.purged, 1);
    assert!(!detached[0].exists());
    assert_eq!(channel.delete_count(), 0);
    assert_eq!(reconnected.delete_count(), 1);
}

/// While the controller is shutting down tasks stay pending instead of being lost.
#[tokio::test]
async fn test_shutdown_keeps_task_pending() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());
    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();

    env.slot.shutdown();
    let summary = queue.process_due().await;

    assert_eq!(summary.pending, 1);
    assert_eq!(queue.len().await, 1);
    assert_eq!(env.detached_dirs().len(), 1);
    assert_eq!(channel.delete_count(), 0);
}

/// A node removed after the wipeout makes the task purge without touching disk.
#[tokio::test]
async fn test_node_removed_after_wipeout_purges_task() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());
    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();

    env.registry.remove("agent-1");
    let summary = queue.process_due().await;

    assert_eq!(summary.purged, 1);
    assert!(queue.is_empty().await);
    assert_eq!(channel.delete_count(), 0);
}

/// A node already gone at wipeout time leads to an inline delete and no task.
#[tokio::test]
async fn test_node_gone_at_wipeout_deletes_inline() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    env.registry.remove("agent-1");
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());

    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();

    assert!(!env.workspace_dir.exists());
    assert!(env.detached_dirs().is_empty());
    assert!(queue.is_empty().await);
}

/// Transient remote failures are retried and recorded until the delete succeeds.
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let channel = Arc::new(
        MockChannel::new()
            .remote_failing_deletes(2, "device or resource busy")
            .silent_deletes(1),
    );
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());
    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();

    assert_eq!(queue.process_due().await.failed, 1);
    assert_eq!(queue.process_due().await.failed, 1);
    let pending = queue.pending().await;
    assert_eq!(pending[0].attempts, 2);
    assert_eq!(
        pending[0].last_error.as_deref(),
        Some("device or resource busy")
    );

    assert_eq!(queue.process_due().await.pending, 1);
    assert_eq!(queue.process_due().await.purged, 1);
    assert!(env.detached_dirs().is_empty());
    assert_eq!(channel.delete_count(), 4);
}

/// A running worker deletes workspaces detached by a separate wipe process.
#[tokio::test]
async fn test_running_worker_picks_up_later_wipeouts() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let worker_queue = env.open_queue().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let queue = Arc::clone(&worker_queue);
        tokio::spawn(async move { queue.run(shutdown_rx).await })
    };

    let wipe_queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), wipe_queue);
    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();
    assert_eq!(env.detached_dirs().len(), 1);

    for _ in 0..250 {
        if env.detached_dirs().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(env.detached_dirs().is_empty());
    assert_eq!(channel.delete_count(), 1);
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(worker_queue.is_empty().await);
}

/// Two workers sharing one storage directory never attempt the same task twice.
#[tokio::test]
async fn test_workers_sharing_storage_attempt_once() {
    let channel = Arc::new(MockChannel::new());
    let env = Env::new(channel.clone());
    let queue = env.open_queue().await;
    let wipeout = Wipeout::new(env.registry.clone(), queue.clone());
    wipeout.perform(&env.workspace(channel.clone())).await.unwrap();
    let other = env.open_queue().await;

    let (first, second) = tokio::join!(queue.process_due(), other.process_due());

    assert_eq!(first.attempted() + second.attempted(), 1);
    assert_eq!(channel.delete_count(), 1);
    assert!(env.detached_dirs().is_empty());
}
