//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::db::DATABASE_FILE_NAME;
use crate::services::checkpoint::DEFAULT_STALE_AGE;
use crate::services::integrity::DEFAULT_INTEGRITY_CONCURRENCY;
use crate::services::probe::DEFAULT_PROBE_TIMEOUT;
use crate::services::scanner::ScanConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory holding the database, WAL files and the checkpoint
    pub data_dir: PathBuf,

    /// Catalog database file
    pub database_path: PathBuf,

    /// Explicit ffprobe binary override
    pub ffprobe_path: Option<PathBuf>,

    /// Explicit ffmpeg binary override
    pub ffmpeg_path: Option<PathBuf>,

    /// Wall-clock limit per probe invocation
    pub probe_timeout: Duration,

    /// Scan pipeline tunables
    pub scan: ScanConfig,

    /// Concurrent decode subprocesses during integrity checks
    pub integrity_max_concurrent: usize,

    /// Age beyond which a leftover checkpoint is pruned at startup
    pub stale_checkpoint_age: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("VIDEO_ANALYZER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(DATABASE_FILE_NAME));

        let mut scan = ScanConfig::default();
        if let Some(value) = env_parse::<usize>("SCAN_MAX_CONCURRENT")? {
            scan.max_concurrent = value.max(1);
        }
        if let Some(value) = env_parse::<usize>("SCAN_BATCH_SIZE")? {
            scan.batch_size = value.max(1);
        }
        if let Some(secs) = env_parse::<u64>("SCAN_CHECKPOINT_SECS")? {
            scan.checkpoint_interval = Duration::from_secs(secs.max(1));
        }

        let probe_timeout = env_parse::<u64>("PROBE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT);

        let integrity_max_concurrent = env_parse::<usize>("INTEGRITY_MAX_CONCURRENT")?
            .map(|v| v.max(1))
            .unwrap_or(DEFAULT_INTEGRITY_CONCURRENCY);

        Ok(Self {
            data_dir,
            database_path,
            ffprobe_path: env::var("FFPROBE_PATH").ok().map(PathBuf::from),
            ffmpeg_path: env::var("FFMPEG_PATH").ok().map(PathBuf::from),
            probe_timeout,
            scan,
            integrity_max_concurrent,
            stale_checkpoint_age: DEFAULT_STALE_AGE,
        })
    }
}

/// Per-user application data directory, `VideoAnalyzer/` under the
/// platform data dir.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("VideoAnalyzer")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}")),
        Err(_) => Ok(None),
    }
}
