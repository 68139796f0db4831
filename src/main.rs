use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use wipeout::app::{handle_fatal_error, init_logging};
use wipeout::config::WipeoutConfig;
use wipeout::controller::{Controller, ControllerSlot};
use wipeout::disposal::DisposalQueue;
use wipeout::node::{FilePath, StaticRegistry};
use wipeout::wipeout::{disposable_kinds, Wipeout, Workspace};

/// Detach build workspaces and dispose of them in the background
#[derive(Parser)]
#[command(name = "wipeout", version)]
#[command(about = "Detach build workspaces and delete them asynchronously", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detach a workspace and queue it for deletion
    Wipe {
        /// Workspace directory
        path: PathBuf,

        /// Node owning the workspace (empty for the controller)
        #[arg(long, default_value = "")]
        node: String,
    },
    /// Run the disposal worker
    Dispose {
        /// Process due tasks once and exit instead of running until Ctrl-C
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let verbose = cli.verbose;
    if let Err(e) = run(cli).await {
        handle_fatal_error(e, verbose);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = WipeoutConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let registry = Arc::new(StaticRegistry::with_local_nodes(config.nodes.iter().cloned()));
    let slot = ControllerSlot::global();
    slot.install(Controller::new(registry.clone()));

    let queue = Arc::new(
        DisposalQueue::open(
            &config.storage_dir,
            &config.queue,
            &disposable_kinds(),
            slot.clone(),
        )
        .await
        .with_context(|| {
            format!(
                "Failed to open disposal queue in {}",
                config.storage_dir.display()
            )
        })?,
    );

    let result = match cli.command {
        Commands::Wipe { path, node } => {
            let wipeout = Wipeout::new(registry, queue).with_suffix_marker(&config.suffix_marker);
            let workspace = Workspace::new(node, FilePath::local(path));
            wipeout
                .perform(&workspace)
                .await
                .with_context(|| format!("Failed to wipe out {}", workspace.path()))
        }
        Commands::Dispose { once } => run_disposal(queue, once).await,
    };

    slot.shutdown();
    result
}

async fn run_disposal(queue: Arc<DisposalQueue>, once: bool) -> Result<()> {
    if once {
        let summary = queue.process_due().await;
        info!(
            "Disposal pass: {} purged, {} pending, {} failed, {} left in queue",
            summary.purged,
            summary.pending,
            summary.failed,
            queue.len().await
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down disposal worker");

    let _ = shutdown_tx.send(true);
    worker.await.context("Disposal worker panicked")?;
    Ok(())
}
