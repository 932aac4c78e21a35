//! Catalog database: connection handling, migrations and repositories.
//!
//! The [`Database`] value is constructed once at startup after migrations
//! and passed by reference to every component that needs it; there is no
//! module-level handle.

pub mod migrations;
pub mod sessions;
pub mod videos;

use std::path::Path;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;

pub use sessions::{CreateScanSession, ScanSessionRecord, ScanSessionRepository, ScanSessionStatus};
pub use videos::{
    CatalogStatistics, CreateVideo, ResolutionCategory, SortColumn, VideoFilter, VideoRecord,
    VideoRepository,
};

/// Database file name inside the application data directory.
pub const DATABASE_FILE_NAME: &str = "video_analyzer.sqlite";

/// Catalog store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database migration failed: {0}")]
    MigrationFailed(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Database wrapper providing connection pool access.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the catalog database at `path`.
    ///
    /// WAL journaling with NORMAL synchronous mode, a ~64 MB page cache and
    /// an in-memory temp store are applied at connection open.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("cache_size", "-65536")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    ///
    /// Capped at a single connection: every pooled connection would
    /// otherwise get its own private empty database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a video repository.
    pub fn videos(&self) -> VideoRepository {
        VideoRepository::new(self.pool.clone())
    }

    /// Get a scan session repository.
    pub fn sessions(&self) -> ScanSessionRepository {
        ScanSessionRepository::new(self.pool.clone())
    }

    /// Apply any pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run(&self.pool).await
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
