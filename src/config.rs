//! Configuration for wipeouts and the disposal queue
//!
//! Configuration is read from a TOML file when one is given, every field
//! falling back to its default, and `WIPEOUT_STORAGE_DIR` overrides the
//! storage location afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding [`WipeoutConfig::storage_dir`]
pub const STORAGE_DIR_ENV: &str = "WIPEOUT_STORAGE_DIR";

/// Longest accepted `queue.retry.max_delay` (30 days)
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeoutConfig {
    /// Where pending disposals are persisted (default: ~/.wipeout)
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Marker placed between a workspace name and the detach timestamp
    #[serde(default = "default_suffix_marker")]
    pub suffix_marker: String,

    /// Disposal queue behaviour
    #[serde(default)]
    pub queue: QueueConfig,

    /// Nodes reachable from this process besides the controller
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl Default for WipeoutConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            suffix_marker: default_suffix_marker(),
            queue: QueueConfig::default(),
            nodes: Vec::new(),
        }
    }
}

/// Disposal queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Longest the worker sleeps before looking for due tasks again
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Tasks executed in parallel during one pass
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Age after which another process's claim on a task counts as abandoned
    #[serde(with = "humantime_serde", default = "default_claim_ttl")]
    pub claim_ttl: Duration,

    /// Spacing between attempts of the same task
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_concurrent: default_max_concurrent(),
            claim_ttl: default_claim_ttl(),
            retry: RetrySettings::default(),
        }
    }
}

/// Backoff between disposal attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Delay after the first unsuccessful attempt
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound for any delay
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomize delays so retries of many tasks spread out
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Jitter range as a fraction of the delay (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl WipeoutConfig {
    /// Load configuration from `path`, or defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                debug!("Loaded configuration from {}", path.display());
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides
    pub fn merge_env_vars(&mut self) {
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            if !dir.is_empty() {
                self.storage_dir = PathBuf::from(dir);
            }
        }
    }

    /// Reject settings the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.suffix_marker.is_empty() {
            return Err(Error::Config("suffix_marker must not be empty".into()));
        }
        if self.queue.max_concurrent == 0 {
            return Err(Error::Config("queue.max_concurrent must be at least 1".into()));
        }
        if self.queue.poll_interval.is_zero() {
            return Err(Error::Config("queue.poll_interval must be positive".into()));
        }
        if self.queue.claim_ttl.is_zero() {
            return Err(Error::Config("queue.claim_ttl must be positive".into()));
        }

        let retry = &self.queue.retry;
        if retry.initial_delay.is_zero() {
            return Err(Error::Config(
                "queue.retry.initial_delay must be positive".into(),
            ));
        }
        if retry.max_delay > MAX_RETRY_DELAY {
            return Err(Error::Config(format!(
                "queue.retry.max_delay ({:?}) exceeds the limit of {:?}",
                retry.max_delay, MAX_RETRY_DELAY
            )));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(Error::Config(format!(
                "queue.retry.initial_delay ({:?}) exceeds max_delay ({:?})",
                retry.initial_delay, retry.max_delay
            )));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "queue.retry.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(Error::Config(
                "queue.retry.jitter_factor must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".wipeout"))
        .unwrap_or_else(|| PathBuf::from(".wipeout"))
}

fn default_suffix_marker() -> String {
    "_wipeout_".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent() -> usize {
    4
}

fn default_claim_ttl() -> Duration {
    Duration::from_secs(3600) // 1 hour
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(3600) // 1 hour
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_jitter_factor() -> f64 {
    0.2
}
