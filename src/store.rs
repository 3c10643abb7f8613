//! Append-only activity stores

use crate::activity::{ActivityEntry, ActivityKind};
use crate::config::Config;
use crate::errors::{MonitorError, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Durable destination for activity entries. Implementations only append.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, entry: &ActivityEntry) -> Result<()>;

    /// All entries for a user in insertion order
    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<ActivityEntry>>;

    /// Newest entries first, at most `limit`
    async fn recent_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let mut entries = self.entries_for_user(user_id).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count_by_kind(&self, user_id: &str) -> Result<HashMap<ActivityKind, usize>> {
        let mut counts = HashMap::new();
        for entry in self.entries_for_user(user_id).await? {
            *counts.entry(entry.action).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    entries: RwLock<Vec<ActivityEntry>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn append(&self, entry: &ActivityEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<ActivityEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// One JSON object per line, appended to a file
#[derive(Debug)]
pub struct JsonLinesActivityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the configured `activity_log_path`
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.activity_log_path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<ActivityEntry>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MonitorError::Persistence(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let mut entries = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping malformed activity record at {}:{}: {}",
                    self.path.display(),
                    index + 1,
                    e
                ),
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl ActivityStore for JsonLinesActivityStore {
    async fn append(&self, entry: &ActivityEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let persist = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };

        persist.await.map_err(|e| {
            MonitorError::Persistence(format!("cannot append to {}: {}", self.path.display(), e))
        })?;

        debug!("Appended activity {} to {}", entry.id, self.path.display());
        Ok(())
    }

    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<ActivityEntry>> {
        let entries = self.read_all().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.user_id == user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityMetadata;
    use chrono::{Duration, Utc};
    use serde_json::Map;

    fn entry(user_id: &str, kind: ActivityKind, minutes_ago: i64) -> ActivityEntry {
        ActivityEntry::new(
            user_id,
            kind,
            Map::new(),
            ActivityMetadata::default().at(Utc::now() - Duration::minutes(minutes_ago)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_queries() {
        let store = MemoryActivityStore::new();
        store.append(&entry("a", ActivityKind::Login, 30)).await.unwrap();
        store.append(&entry("a", ActivityKind::SubmitQuestion, 20)).await.unwrap();
        store.append(&entry("a", ActivityKind::SubmitQuestion, 10)).await.unwrap();
        store.append(&entry("b", ActivityKind::Login, 5)).await.unwrap();

        let recent = store.recent_for_user("a", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert_eq!(recent[0].action, ActivityKind::SubmitQuestion);

        let counts = store.count_by_kind("a").await.unwrap();
        assert_eq!(counts[&ActivityKind::SubmitQuestion], 2);
        assert_eq!(counts[&ActivityKind::Login], 1);
        assert!(!counts.contains_key(&ActivityKind::Logout));
    }

    #[tokio::test]
    async fn test_json_lines_store_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesActivityStore::new(dir.path().join("activity.jsonl"));

        assert!(store.entries_for_user("a").await.unwrap().is_empty());

        let first = entry("a", ActivityKind::ExportData, 2);
        store.append(&first).await.unwrap();
        store.append(&entry("b", ActivityKind::SaveTeam, 1)).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        let entries = store.entries_for_user("a").await.unwrap();
        assert_eq!(entries, vec![first]);
    }

    #[tokio::test]
    async fn test_json_lines_store_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configured.jsonl");
        let config = Config {
            activity_log_path: path.display().to_string(),
            ..Config::default()
        };

        let store = JsonLinesActivityStore::from_config(&config);
        assert_eq!(store.path(), path.as_path());

        store.append(&entry("a", ActivityKind::Login, 0)).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.entries_for_user("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_store_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let store = JsonLinesActivityStore::new(&path);

        store.append(&entry("a", ActivityKind::Login, 1)).await.unwrap();
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{not json}\n");
        tokio::fs::write(&path, contents).await.unwrap();
        store.append(&entry("a", ActivityKind::Logout, 0)).await.unwrap();

        assert_eq!(store.entries_for_user("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_store_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesActivityStore::new(dir.path().join("missing").join("activity.jsonl"));

        let err = store
            .append(&entry("a", ActivityKind::Login, 0))
            .await
            .unwrap_err();
        assert!(err.is_persistence());
    }
}
