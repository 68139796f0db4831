//! Cross-process claims on queued disposals
//!
//! A claim is a lock file created exclusively beside the task records. Only
//! the holder of a task's claim attempts it, so queues of different processes
//! sharing a storage directory never run the same task at the same time. A
//! claim file older than its time-to-live was left by a holder that died and
//! may be taken over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct ClaimInfo {
    token: String,
    pid: u32,
    claimed_at: DateTime<Utc>,
}

/// Exclusive right to attempt one disposal, released on drop
#[derive(Debug)]
pub struct DisposalClaim {
    path: PathBuf,
    token: String,
    released: bool,
}

impl DisposalClaim {
    /// Claim `path`, or return `None` while another holder's claim is live
    pub async fn acquire(path: PathBuf, ttl: Duration) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Second round only after removing an abandoned claim
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    let token = Uuid::new_v4().to_string();
                    if let Err(e) = write_info(file, &token).await {
                        let _ = fs::remove_file(&path).await;
                        return Err(e);
                    }
                    debug!("Claimed {:?}", path);
                    return Ok(Some(Self {
                        path,
                        token,
                        released: false,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_abandoned(&path, ttl).await? {
                        return Ok(None);
                    }
                    warn!("Taking over abandoned claim {:?}", path);
                    match fs::remove_file(&path).await {
                        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                        _ => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Remove the claim file unless another holder has taken it over
    pub async fn release(mut self) -> io::Result<()> {
        self.released = true;
        match fs::read_to_string(&self.path).await {
            Ok(content) if holds(&content, &self.token) => fs::remove_file(&self.path).await,
            Ok(_) => {
                warn!("Claim {:?} was taken over before release", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for DisposalClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Best-effort cleanup when the attempt was cancelled
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if holds(&content, &self.token) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

async fn write_info(mut file: fs::File, token: &str) -> io::Result<()> {
    let info = ClaimInfo {
        token: token.to_string(),
        pid: std::process::id(),
        claimed_at: Utc::now(),
    };
    file.write_all(serde_json::to_string(&info)?.as_bytes()).await?;
    file.flush().await
}

fn holds(content: &str, token: &str) -> bool {
    serde_json::from_str::<ClaimInfo>(content).is_ok_and(|info| info.token == token)
}

/// A claim vanished meanwhile counts as abandoned so the caller retries
async fn is_abandoned(path: &Path, ttl: Duration) -> io::Result<bool> {
    let modified = match fs::metadata(path).await {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    Ok(SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > ttl))
}
