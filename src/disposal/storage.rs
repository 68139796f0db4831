//! File persistence of pending disposals
//!
//! Each task lives in its own JSON file under `tasks/`, next to an
//! `index.json` summarising the queue for operators. Claims of tasks being
//! attempted live under `claims/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error};
use uuid::Uuid;

use super::claim::DisposalClaim;
use super::QueueError;

/// Persisted form of a queued task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposalRecord {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Storage handler for disposal records
#[derive(Debug, Clone)]
pub struct DisposalStorage {
    base_path: PathBuf,
}

impl DisposalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn tasks_dir(&self) -> PathBuf {
        self.base_path.join("tasks")
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", id))
    }

    fn claim_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join("claims").join(format!("{}.lock", id))
    }

    /// Write a record, replacing any earlier version of it
    pub async fn persist(&self, record: &DisposalRecord) -> Result<(), QueueError> {
        let record_path = self.record_path(record.id);
        fs::create_dir_all(self.tasks_dir()).await?;

        // Write beside the target and rename so a crash never leaves half a record
        let tmp_path = record_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &record_path).await?;

        self.update_index().await?;

        debug!("Persisted disposal {} to {:?}", record.id, record_path);
        Ok(())
    }

    /// Remove a record; removing a missing record is not an error
    pub async fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        let record_path = self.record_path(id);

        if fs::try_exists(&record_path).await? {
            fs::remove_file(&record_path).await?;
            self.update_index().await?;
            debug!("Removed disposal {} from storage", id);
        }

        Ok(())
    }

    /// Current version of one record, `None` once it has been removed
    pub async fn load(&self, id: Uuid) -> Result<Option<DisposalRecord>, QueueError> {
        match fs::read_to_string(self.record_path(id)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim a record for one attempt; `None` while another holder has it
    pub async fn claim(
        &self,
        id: Uuid,
        ttl: Duration,
    ) -> Result<Option<DisposalClaim>, QueueError> {
        Ok(DisposalClaim::acquire(self.claim_path(id), ttl).await?)
    }

    /// Load every readable record. Files that cannot be parsed are logged and
    /// left in place for an operator to inspect.
    pub async fn load_all(&self) -> Result<Vec<DisposalRecord>, QueueError> {
        let tasks_dir = self.tasks_dir();
        let mut records = Vec::new();

        if !fs::try_exists(&tasks_dir).await? {
            return Ok(records);
        }

        let mut entries = fs::read_dir(&tasks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<DisposalRecord>(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        error!("Failed to parse disposal record from {:?}: {}", path, e);
                    }
                },
                // Removed by another process since the directory was listed
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to read disposal record from {:?}: {}", path, e);
                }
            }
        }

        records.sort_by_key(|record| record.registered_at);
        debug!(
            "Loaded {} disposal record(s) from {:?}",
            records.len(),
            tasks_dir
        );
        Ok(records)
    }

    async fn update_index(&self) -> Result<(), QueueError> {
        let index_path = self.base_path.join("index.json");
        let tasks_dir = self.tasks_dir();

        let mut task_ids = Vec::new();
        if fs::try_exists(&tasks_dir).await? {
            let mut entries = fs::read_dir(&tasks_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(id) = name.strip_suffix(".json") {
                        task_ids.push(id.to_string());
                    }
                }
            }
        }
        task_ids.sort();

        let index = serde_json::json!({
            "task_count": task_ids.len(),
            "task_ids": task_ids,
            "updated_at": Utc::now(),
        });

        fs::create_dir_all(&self.base_path).await?;
        fs::write(index_path, serde_json::to_string_pretty(&index)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(path: &str) -> DisposalRecord {
        let now = Utc::now();
        DisposalRecord {
            id: Uuid::new_v4(),
            kind: "remote-delete".to_string(),
            payload: json!({ "node": "agent-1", "path": path }),
            display_name: format!("Workspace agent-1:{}", path),
            registered_at: now,
            attempts: 0,
            last_attempt: None,
            next_attempt_at: now,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        let first = record("/jobs/a/workspace_wipeout_1");
        let second = record("/jobs/b/workspace_wipeout_2");

        storage.persist(&first).await.unwrap();
        storage.persist(&second).await.unwrap();

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|r| r.id == first.id));
        assert!(loaded.iter().any(|r| r.payload == second.payload));

        let index: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(temp_dir.path().join("index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(index["task_count"], 2);
    }

    #[tokio::test]
    async fn test_persist_overwrites_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        let mut rec = record("/jobs/a/workspace_wipeout_1");
        storage.persist(&rec).await.unwrap();

        rec.attempts = 3;
        rec.last_error = Some("connection reset".to_string());
        storage.persist(&rec).await.unwrap();

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].attempts, 3);
        assert_eq!(loaded[0].last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_remove_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        let rec = record("/jobs/a/workspace_wipeout_1");
        storage.persist(&rec).await.unwrap();

        storage.remove(rec.id).await.unwrap();
        storage.remove(rec.id).await.unwrap();

        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_corrupt_records() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        storage.persist(&record("/jobs/a/ws")).await.unwrap();
        let corrupt = temp_dir.path().join("tasks").join("broken.json");
        std::fs::write(&corrupt, "{ not json").unwrap();

        let loaded = storage.load_all().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(corrupt.exists());
    }

    #[tokio::test]
    async fn test_load_from_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path().join("nothing-here"));

        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_single_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        let rec = record("/jobs/a/ws");
        storage.persist(&rec).await.unwrap();

        let loaded = storage.load(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, rec.payload);

        storage.remove(rec.id).await.unwrap();
        assert!(storage.load(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claims_are_kept_apart_from_records() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DisposalStorage::new(temp_dir.path());
        let rec = record("/jobs/a/ws");
        storage.persist(&rec).await.unwrap();
        let ttl = Duration::from_secs(3600);

        let claim = storage.claim(rec.id, ttl).await.unwrap().unwrap();
        assert!(storage.claim(rec.id, ttl).await.unwrap().is_none());
        assert_eq!(storage.load_all().await.unwrap().len(), 1);

        claim.release().await.unwrap();
        assert!(storage.claim(rec.id, ttl).await.unwrap().is_some());
    }
}
