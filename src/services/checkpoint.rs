//! Durable scan checkpoints
//!
//! A single JSON file outside the database holds enough state to resume an
//! interrupted scan after a crash or restart: the session id, counters and
//! the untouched pending paths. The file is rewritten atomically
//! (write-temp-then-rename) and deleted once a session reaches a terminal
//! state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Checkpoint file name inside the application data directory.
pub const CHECKPOINT_FILE_NAME: &str = "scan_checkpoint.json";

/// Checkpoints older than this are pruned on startup.
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Serialized scan state sufficient to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub folder_path: PathBuf,
    pub total_files: usize,
    pub processed_files: usize,
    pub pending_file_paths: Vec<PathBuf>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn progress_percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.processed_files as f64 / self.total_files as f64 * 100.0
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.saved_at);
        age.num_seconds() >= max_age.as_secs() as i64
    }
}

/// Owns the checkpoint file location and its atomic rewrite protocol.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store the checkpoint under `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CHECKPOINT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replace the checkpoint file.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let body = serde_json::to_vec_pretty(checkpoint).context("serialize checkpoint")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("write checkpoint temp file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace checkpoint file {}", self.path.display()))?;
        Ok(())
    }

    /// Load the current checkpoint, if any.
    ///
    /// An unreadable or unparseable file is treated as absent so a damaged
    /// checkpoint can never wedge startup.
    pub async fn load(&self) -> Option<Checkpoint> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read checkpoint file");
                return None;
            }
        };

        match serde_json::from_slice(&body) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Checkpoint file is not valid JSON");
                None
            }
        }
    }

    /// Remove the checkpoint file; absence is not an error.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("delete checkpoint file {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(total: usize, processed: usize) -> Checkpoint {
        Checkpoint {
            session_id: "a2f1c3d4-0000-0000-0000-000000000000".to_string(),
            folder_path: PathBuf::from("/library"),
            total_files: total,
            processed_files: processed,
            pending_file_paths: vec![
                PathBuf::from("/library/a.mkv"),
                PathBuf::from("/library/b.mp4"),
            ],
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let checkpoint = sample(100, 40);
        store.save(&checkpoint).await.unwrap();
        assert!(store.exists());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, checkpoint);

        // No stray temp file is left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![CHECKPOINT_FILE_NAME]);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.save(&sample(100, 10)).await.unwrap();
        store.save(&sample(100, 60)).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.processed_files, 60);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.save(&sample(10, 0)).await.unwrap();
        store.delete().await.unwrap();
        assert!(!store.exists());
        store.delete().await.unwrap();
    }

    #[test]
    fn test_staleness() {
        let mut checkpoint = sample(10, 5);
        assert!(!checkpoint.is_stale(DEFAULT_STALE_AGE));

        checkpoint.saved_at = Utc::now() - chrono::Duration::hours(25);
        assert!(checkpoint.is_stale(DEFAULT_STALE_AGE));
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(sample(100, 40).progress_percentage(), 40.0);
        assert_eq!(sample(0, 0).progress_percentage(), 0.0);
    }
}
