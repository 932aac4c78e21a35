//! Linear schema migrations.
//!
//! Each migration runs once, inside its own transaction, and records its
//! version in `schema_migrations`; re-running the migrator against an
//! up-to-date database is a no-op.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::StoreError;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create videos and scan_sessions tables",
        sql: r#"
CREATE TABLE videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    duration_seconds REAL,
    video_codec TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    frame_rate REAL,
    bit_rate INTEGER,
    bit_depth INTEGER,
    hdr_format TEXT NOT NULL,
    audio_codec TEXT NOT NULL,
    audio_channels INTEGER,
    is_atmos INTEGER NOT NULL DEFAULT 0,
    is_dtsx INTEGER NOT NULL DEFAULT 0,
    container_format TEXT NOT NULL,
    scan_session_id TEXT,
    scanned_at TEXT NOT NULL
);

CREATE TABLE scan_sessions (
    id TEXT PRIMARY KEY,
    folder_path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    total_files INTEGER NOT NULL DEFAULT 0,
    processed_files INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    last_checkpoint_at TEXT,
    pending_files TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX idx_videos_video_codec ON videos(video_codec);
CREATE INDEX idx_videos_dimensions ON videos(width, height);
CREATE INDEX idx_videos_hdr_format ON videos(hdr_format);
CREATE INDEX idx_videos_audio_codec ON videos(audio_codec);
CREATE INDEX idx_videos_container_format ON videos(container_format);
CREATE INDEX idx_videos_scan_session_id ON videos(scan_session_id);
CREATE INDEX idx_videos_file_size ON videos(file_size);
CREATE INDEX idx_videos_duration ON videos(duration_seconds);
"#,
    },
    Migration {
        version: 2,
        description: "add file hash and corruption columns",
        sql: r#"
ALTER TABLE videos ADD COLUMN file_hash TEXT;
ALTER TABLE videos ADD COLUMN is_corrupted INTEGER NOT NULL DEFAULT 0;
ALTER TABLE videos ADD COLUMN corruption_details TEXT;

CREATE INDEX idx_videos_file_hash ON videos(file_hash);
"#,
    },
];

/// Apply every migration newer than the recorded schema version.
pub async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;

        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!(
                    "v{} ({}): {}",
                    migration.version, migration.description, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)",
        )
        .bind(migration.version)
        .bind(migration.description)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(version = migration.version, "Applied migration: {}", migration.description);
    }

    debug!(version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0), "Schema up to date");
    Ok(())
}

/// Latest schema version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
