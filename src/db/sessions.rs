//! Scan session repository
//!
//! One row per scan invocation; the unit of crash recovery. The pending
//! path list is serialized into the row as JSON so a session can be
//! rehydrated without a separate table.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::StoreError;

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ScanSessionStatus {
    #[serde(rename = "in_progress")]
    #[sqlx(rename = "in_progress")]
    InProgress,
    #[serde(rename = "paused")]
    #[sqlx(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    #[sqlx(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    #[sqlx(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "failed")]
    #[sqlx(rename = "failed")]
    Failed,
}

impl ScanSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSessionStatus::InProgress => "in_progress",
            ScanSessionStatus::Paused => "paused",
            ScanSessionStatus::Completed => "completed",
            ScanSessionStatus::Cancelled => "cancelled",
            ScanSessionStatus::Failed => "failed",
        }
    }

    /// A session reaches a terminal status exactly once.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanSessionStatus::Completed | ScanSessionStatus::Cancelled | ScanSessionStatus::Failed
        )
    }
}

impl std::fmt::Display for ScanSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scan session record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanSessionRecord {
    pub id: String,
    pub folder_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub processed_files: i64,
    pub status: ScanSessionStatus,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub pending_files: String,
}

impl ScanSessionRecord {
    /// Deserialize the stored pending path list.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        serde_json::from_str(&self.pending_files).unwrap_or_default()
    }
}

/// Input for creating a scan session.
#[derive(Debug, Clone)]
pub struct CreateScanSession {
    pub id: String,
    pub folder_path: String,
    pub total_files: i64,
    pub pending_files: Vec<String>,
}

const SESSION_COLUMNS: &str = "id, folder_path, started_at, completed_at, total_files, \
     processed_files, status, last_checkpoint_at, pending_files";

pub struct ScanSessionRepository {
    pool: SqlitePool,
}

impl ScanSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new session with status `in_progress`.
    pub async fn create(&self, input: &CreateScanSession) -> Result<ScanSessionRecord, StoreError> {
        let pending_json =
            serde_json::to_string(&input.pending_files).unwrap_or_else(|_| "[]".to_string());
        let sql = format!(
            "INSERT INTO scan_sessions (id, folder_path, started_at, total_files, \
             processed_files, status, pending_files) \
             VALUES (?, ?, ?, ?, 0, ?, ?) \
             RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, ScanSessionRecord>(&sql)
            .bind(&input.id)
            .bind(&input.folder_path)
            .bind(Utc::now())
            .bind(input.total_files)
            .bind(ScanSessionStatus::InProgress)
            .bind(&pending_json)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScanSessionRecord>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM scan_sessions WHERE id = ?");
        let record = sqlx::query_as::<_, ScanSessionRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent sessions first.
    pub async fn list(&self, limit: i64) -> Result<Vec<ScanSessionRecord>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM scan_sessions ORDER BY started_at DESC LIMIT ?"
        );
        let records = sqlx::query_as::<_, ScanSessionRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Update counters and the pending list, stamping the checkpoint time.
    pub async fn update_progress(
        &self,
        id: &str,
        processed_files: i64,
        pending_files: &[String],
        checkpointed: bool,
    ) -> Result<(), StoreError> {
        let pending_json =
            serde_json::to_string(pending_files).unwrap_or_else(|_| "[]".to_string());
        let checkpoint_at = checkpointed.then(Utc::now);
        sqlx::query(
            "UPDATE scan_sessions SET processed_files = ?, pending_files = ?, \
             last_checkpoint_at = COALESCE(?, last_checkpoint_at) WHERE id = ?",
        )
        .bind(processed_files)
        .bind(&pending_json)
        .bind(checkpoint_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a session to a new status; terminal statuses stamp
    /// `completed_at`.
    pub async fn set_status(&self, id: &str, status: ScanSessionStatus) -> Result<(), StoreError> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            "UPDATE scan_sessions SET status = ?, \
             completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a session, detaching its videos (scan_session_id becomes
    /// NULL) rather than deleting them.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE videos SET scan_session_id = NULL WHERE scan_session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM scan_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
