//! Duplicate detection over catalog records
//!
//! Three methods with increasing cost and confidence: fuzzy metadata
//! grouping, partial content hashing (three SHA-256 windows) and full
//! content hashing (pre-grouped by exact size). Files that cannot be
//! opened are silently excluded from their group.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::VideoRecord;

/// Bytes hashed per window in partial-hash mode.
pub const DEFAULT_PARTIAL_WINDOW: usize = 64 * 1024;

/// Chunk size for full-content hashing.
const FULL_HASH_CHUNK: usize = 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Detection method; doubles as the match type reported per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMethod {
    Fuzzy,
    PartialHash,
    FullHash,
}

impl DuplicateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateMethod::Fuzzy => "fuzzy",
            DuplicateMethod::PartialHash => "partial_hash",
            DuplicateMethod::FullHash => "full_hash",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fuzzy" => Some(DuplicateMethod::Fuzzy),
            "partial" | "partial_hash" | "partial-hash" => Some(DuplicateMethod::PartialHash),
            "full" | "full_hash" | "full-hash" => Some(DuplicateMethod::FullHash),
            _ => None,
        }
    }
}

impl std::fmt::Display for DuplicateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work phase attached to progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePhase {
    Analyzing,
    Hashing,
    Comparing,
}

/// Per-file detection progress.
#[derive(Debug, Clone)]
pub struct DuplicateProgress {
    pub phase: DuplicatePhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<PathBuf>,
}

/// A set of probably-identical files.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub files: Vec<VideoRecord>,
    pub match_type: DuplicateMethod,
    pub confidence: f64,
}

impl DuplicateGroup {
    pub fn total_size(&self) -> i64 {
        self.files.iter().map(|f| f.file_size).sum()
    }

    /// Bytes reclaimable by keeping only the largest member.
    pub fn potential_savings(&self) -> i64 {
        let largest = self.files.iter().map(|f| f.file_size).max().unwrap_or(0);
        self.total_size() - largest
    }
}

/// Duplicate detector with per-file progress events.
pub struct DuplicateDetector {
    partial_window: usize,
    progress_tx: broadcast::Sender<DuplicateProgress>,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::with_partial_window(DEFAULT_PARTIAL_WINDOW)
    }

    pub fn with_partial_window(partial_window: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(256);
        Self {
            partial_window,
            progress_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DuplicateProgress> {
        self.progress_tx.subscribe()
    }

    /// Group the given records by the chosen method.
    ///
    /// Groups of fewer than two files are dropped; the rest are sorted by
    /// total group size, largest first.
    pub async fn detect(
        &self,
        records: Vec<VideoRecord>,
        method: DuplicateMethod,
    ) -> Vec<DuplicateGroup> {
        let mut groups = match method {
            DuplicateMethod::Fuzzy => self.fuzzy_groups(records),
            DuplicateMethod::PartialHash => self.partial_hash_groups(records).await,
            DuplicateMethod::FullHash => self.full_hash_groups(records).await,
        };

        groups.retain(|g| g.files.len() >= 2);
        groups.sort_by_key(|g| std::cmp::Reverse(g.total_size()));
        groups
    }

    /// Key by (5-second duration bucket, 1 MiB size bucket, resolution).
    fn fuzzy_groups(&self, records: Vec<VideoRecord>) -> Vec<DuplicateGroup> {
        let total = records.len();
        let mut buckets: HashMap<(u64, u64, String), Vec<VideoRecord>> = HashMap::new();

        for (i, record) in records.into_iter().enumerate() {
            self.emit(
                DuplicatePhase::Analyzing,
                i + 1,
                total,
                Some(PathBuf::from(&record.file_path)),
            );
            buckets.entry(fuzzy_key(&record)).or_default().push(record);
        }

        let candidates = buckets.len();
        buckets
            .into_values()
            .enumerate()
            .map(|(i, files)| {
                self.emit(DuplicatePhase::Comparing, i + 1, candidates, None);
                let confidence = fuzzy_confidence(&files);
                DuplicateGroup {
                    files,
                    match_type: DuplicateMethod::Fuzzy,
                    confidence,
                }
            })
            .collect()
    }

    async fn partial_hash_groups(&self, records: Vec<VideoRecord>) -> Vec<DuplicateGroup> {
        let total = records.len();
        let window = self.partial_window;
        let mut buckets: HashMap<String, Vec<VideoRecord>> = HashMap::new();

        for (i, record) in records.into_iter().enumerate() {
            let path = PathBuf::from(&record.file_path);
            self.emit(DuplicatePhase::Hashing, i + 1, total, Some(path.clone()));

            let hashed =
                tokio::task::spawn_blocking(move || partial_hash(&path, window)).await;
            match hashed {
                Ok(Ok(hash)) => buckets.entry(hash).or_default().push(record),
                Ok(Err(e)) => {
                    debug!(path = %record.file_path, error = %e, "Skipping unreadable file");
                }
                Err(e) => {
                    debug!(path = %record.file_path, error = %e, "Hash task failed");
                }
            }
        }

        self.collect_hash_groups(buckets, DuplicateMethod::PartialHash, 0.95)
    }

    /// Full SHA-256, but only within groups whose sizes already match
    /// exactly; differing sizes can never be byte-identical.
    async fn full_hash_groups(&self, records: Vec<VideoRecord>) -> Vec<DuplicateGroup> {
        let total = records.len();
        let mut by_size: HashMap<i64, Vec<VideoRecord>> = HashMap::new();
        for (i, record) in records.into_iter().enumerate() {
            self.emit(
                DuplicatePhase::Analyzing,
                i + 1,
                total,
                Some(PathBuf::from(&record.file_path)),
            );
            by_size.entry(record.file_size).or_default().push(record);
        }

        let to_hash: Vec<VideoRecord> = by_size
            .into_values()
            .filter(|group| group.len() >= 2)
            .flatten()
            .collect();

        let hash_total = to_hash.len();
        let mut buckets: HashMap<String, Vec<VideoRecord>> = HashMap::new();
        for (i, record) in to_hash.into_iter().enumerate() {
            let path = PathBuf::from(&record.file_path);
            self.emit(DuplicatePhase::Hashing, i + 1, hash_total, Some(path.clone()));

            let hashed = tokio::task::spawn_blocking(move || full_hash(&path)).await;
            match hashed {
                Ok(Ok(hash)) => buckets.entry(hash).or_default().push(record),
                Ok(Err(e)) => {
                    debug!(path = %record.file_path, error = %e, "Skipping unreadable file");
                }
                Err(e) => {
                    debug!(path = %record.file_path, error = %e, "Hash task failed");
                }
            }
        }

        self.collect_hash_groups(buckets, DuplicateMethod::FullHash, 1.0)
    }

    fn collect_hash_groups(
        &self,
        buckets: HashMap<String, Vec<VideoRecord>>,
        method: DuplicateMethod,
        confidence: f64,
    ) -> Vec<DuplicateGroup> {
        let candidates = buckets.len();
        buckets
            .into_values()
            .enumerate()
            .map(|(i, files)| {
                self.emit(DuplicatePhase::Comparing, i + 1, candidates, None);
                DuplicateGroup {
                    files,
                    match_type: method,
                    confidence,
                }
            })
            .collect()
    }

    fn emit(
        &self,
        phase: DuplicatePhase,
        current: usize,
        total: usize,
        current_file: Option<PathBuf>,
    ) {
        let _ = self.progress_tx.send(DuplicateProgress {
            phase,
            current,
            total,
            current_file,
        });
    }
}

fn fuzzy_key(record: &VideoRecord) -> (u64, u64, String) {
    let duration_bucket = record
        .duration_seconds
        .map(|d| (d.max(0.0) as u64 / 5) * 5)
        .unwrap_or(0);
    let size_bucket = record.file_size.max(0) as u64 / MIB;
    let resolution = format!(
        "{}x{}",
        record.width.unwrap_or(0),
        record.height.unwrap_or(0)
    );
    (duration_bucket, size_bucket, resolution)
}

/// Base 0.5, plus bonuses for tight size spread and agreeing codecs and
/// containers, clamped to 1.0.
fn fuzzy_confidence(files: &[VideoRecord]) -> f64 {
    let mut confidence: f64 = 0.5;

    let min_size = files.iter().map(|f| f.file_size).min().unwrap_or(0);
    let max_size = files.iter().map(|f| f.file_size).max().unwrap_or(0);
    if min_size > 0 {
        let variation = (max_size - min_size) as f64 / min_size as f64;
        if variation < 0.01 {
            confidence += 0.3;
        } else if variation < 0.05 {
            confidence += 0.2;
        } else if variation < 0.10 {
            confidence += 0.1;
        }
    }

    if files.windows(2).all(|w| w[0].video_codec == w[1].video_codec) {
        confidence += 0.1;
    }
    if files
        .windows(2)
        .all(|w| w[0].container_format == w[1].container_format)
    {
        confidence += 0.1;
    }

    confidence.min(1.0)
}

/// SHA-256 over three windows: leading, centered and trailing `window`
/// bytes. Files no larger than two windows hash only the leading window.
fn partial_hash(path: &Path, window: usize) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; window];

    let read = read_window(&mut file, 0, &mut buf)?;
    hasher.update(&buf[..read]);

    if len > 2 * window as u64 {
        let mid = len / 2 - window as u64 / 2;
        let read = read_window(&mut file, mid, &mut buf)?;
        hasher.update(&buf[..read]);

        let tail_start = len - window as u64;
        let read = read_window(&mut file, tail_start, &mut buf)?;
        hasher.update(&buf[..read]);
    }

    Ok(hex_digest(&hasher.finalize()))
}

/// Full-content SHA-256 in 1 MiB chunks.
fn full_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FULL_HASH_CHUNK];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex_digest(&hasher.finalize()))
}

fn read_window(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    while total < buf.len() {
        let read = file.read(&mut buf[total..])?;
        if read == 0 {
            break;
        }
        total += read;
    }
    Ok(total)
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
