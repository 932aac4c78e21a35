//! Corruption detection via a full decode pass
//!
//! Runs `ffmpeg -v error -i <file> -f null -` per record under a bounded
//! worker pool. A file is reported corrupted iff the decoder wrote
//! anything to stderr; each stderr line is classified by substring and
//! scanned for a media timestamp.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::probe::resolve_tool;
use crate::db::VideoRecord;

/// Default bound on concurrent decode subprocesses.
pub const DEFAULT_INTEGRITY_CONCURRENCY: usize = 4;

/// Classified corruption evidence; first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionType {
    InvalidData,
    MissingData,
    Truncated,
    SyncError,
    DecodeError,
    HeaderError,
    ProcessError,
    Unknown,
}

impl CorruptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptionType::InvalidData => "invalid_data",
            CorruptionType::MissingData => "missing_data",
            CorruptionType::Truncated => "truncated",
            CorruptionType::SyncError => "sync_error",
            CorruptionType::DecodeError => "decode_error",
            CorruptionType::HeaderError => "header_error",
            CorruptionType::ProcessError => "process_error",
            CorruptionType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CorruptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One decoder complaint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionError {
    pub error_type: CorruptionType,
    pub message: String,
    /// Media timestamp in seconds, when one could be extracted.
    pub timestamp: Option<f64>,
}

/// Outcome of checking one record.
#[derive(Debug, Clone)]
pub struct IntegrityResult {
    pub record_id: i64,
    pub file_path: PathBuf,
    pub is_corrupted: bool,
    pub errors: Vec<CorruptionError>,
}

/// Per-file and overall check progress.
#[derive(Debug, Clone)]
pub struct IntegrityProgress {
    pub completed: usize,
    pub total: usize,
    pub current_file: Option<PathBuf>,
    pub corrupted: usize,
}

/// Integrity checker with a bounded decode pool.
pub struct IntegrityChecker {
    ffmpeg: PathBuf,
    max_concurrent: usize,
    progress_tx: broadcast::Sender<IntegrityProgress>,
}

impl IntegrityChecker {
    pub fn new(configured: Option<&Path>, max_concurrent: usize) -> Result<Self> {
        let ffmpeg = resolve_tool("ffmpeg", configured).context(
            "ffmpeg binary not found (looked beside the executable, in system locations and on PATH)",
        )?;
        let (progress_tx, _) = broadcast::channel(256);
        Ok(Self {
            ffmpeg,
            max_concurrent: max_concurrent.max(1),
            progress_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntegrityProgress> {
        self.progress_tx.subscribe()
    }

    /// Decode every record, at most `max_concurrent` at a time.
    pub async fn check_all(&self, records: &[VideoRecord]) -> Vec<IntegrityResult> {
        let total = records.len();
        let mut results = Vec::with_capacity(total);
        let mut corrupted = 0;

        let mut checks = stream::iter(
            records
                .iter()
                .map(|record| self.check_record(record.id, PathBuf::from(&record.file_path))),
        )
        .buffer_unordered(self.max_concurrent);

        while let Some(result) = checks.next().await {
            if result.is_corrupted {
                corrupted += 1;
            }
            let _ = self.progress_tx.send(IntegrityProgress {
                completed: results.len() + 1,
                total,
                current_file: Some(result.file_path.clone()),
                corrupted,
            });
            results.push(result);
        }

        results
    }

    /// Decode one file to the null sink and interpret its stderr.
    pub async fn check_record(&self, record_id: i64, path: PathBuf) -> IntegrityResult {
        debug!(path = %path.display(), "Checking file integrity");

        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error"])
            .arg("-i")
            .arg(&path)
            .args(["-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to start decoder");
                return IntegrityResult {
                    record_id,
                    file_path: path,
                    is_corrupted: false,
                    errors: vec![CorruptionError {
                        error_type: CorruptionType::ProcessError,
                        message: format!("failed to start decoder: {e}"),
                        timestamp: None,
                    }],
                };
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let errors: Vec<CorruptionError> = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| CorruptionError {
                error_type: classify_error_line(line),
                message: line.to_string(),
                timestamp: extract_timestamp(line),
            })
            .collect();

        IntegrityResult {
            record_id,
            file_path: path,
            is_corrupted: !errors.is_empty(),
            errors,
        }
    }
}

/// Case-insensitive substring classification; first match wins.
fn classify_error_line(line: &str) -> CorruptionType {
    let lower = line.to_lowercase();
    if lower.contains("invalid") || lower.contains("corrupt") {
        CorruptionType::InvalidData
    } else if lower.contains("missing") || lower.contains("not found") {
        CorruptionType::MissingData
    } else if lower.contains("truncated") || lower.contains("end of file") {
        CorruptionType::Truncated
    } else if lower.contains("sync") || lower.contains("timestamp") {
        CorruptionType::SyncError
    } else if lower.contains("decode") || lower.contains("decoding") {
        CorruptionType::DecodeError
    } else if lower.contains("header") {
        CorruptionType::HeaderError
    } else {
        CorruptionType::Unknown
    }
}

static TIMESTAMP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // timestamp=12.5 or timestamp: 12.5
        Regex::new(r"(?i)timestamp[=:]\s*(-?[0-9]+(?:\.[0-9]+)?)").unwrap(),
        // pts 12345 / pts=12345
        Regex::new(r"(?i)\bpts\s*[=:]?\s*(-?[0-9]+(?:\.[0-9]+)?)").unwrap(),
        // time=00:01:23.45 style clocks
        Regex::new(r"\b([0-9]{1,2}):([0-9]{2}):([0-9]{2}(?:\.[0-9]+)?)\b").unwrap(),
        // bare "12.5 sec" / "12.5 seconds"
        Regex::new(r"(?i)\b([0-9]+(?:\.[0-9]+)?)\s*sec(?:ond)?s?\b").unwrap(),
    ]
});

/// Extract a media timestamp (seconds) from a decoder error line.
fn extract_timestamp(line: &str) -> Option<f64> {
    for (i, pattern) in TIMESTAMP_PATTERNS.iter().enumerate() {
        let Some(captures) = pattern.captures(line) else {
            continue;
        };
        // The clock pattern carries three capture groups.
        if i == 2 {
            let hours: f64 = captures.get(1)?.as_str().parse().ok()?;
            let minutes: f64 = captures.get(2)?.as_str().parse().ok()?;
            let seconds: f64 = captures.get(3)?.as_str().parse().ok()?;
            return Some(hours * 3600.0 + minutes * 60.0 + seconds);
        }
        return captures.get(1)?.as_str().parse().ok();
    }
    None
}
