//! Scan engine
//!
//! Orchestrates discovery -> probe -> parse -> batched persist for one
//! folder tree at a time. A single actor task owns the pending queue,
//! counters, batch buffer and session state; lifecycle commands, worker
//! completions and the checkpoint timer all arrive through its inbox, so
//! no state is shared under a lock.
//!
//! Three output streams feed clients: a watch channel for progress
//! (last-value-wins), a broadcast ring for log entries (oldest dropped
//! under backpressure) and a broadcast for the one-shot completion summary.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::metadata::{self, VideoMetadata};
use super::probe::ProbeRunner;
use crate::db::{CreateScanSession, CreateVideo, Database, ScanSessionStatus};

/// File extensions considered video content during discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "mov", "avi", "wmv", "webm", "flv", "m4v", "ts", "mts", "m2ts", "vob", "mpg",
    "mpeg", "m2v", "3gp", "ogv", "divx", "rm", "rmvb", "asf",
];

/// Directory extensions that mark macOS-style bundles; their contents are
/// never real library files.
const BUNDLE_EXTENSIONS: &[&str] = &[
    "app",
    "bundle",
    "framework",
    "photoslibrary",
    "fcpbundle",
    "imovielibrary",
    "tvlibrary",
];

/// Capacity of the log broadcast ring; the oldest entries are dropped for
/// slow subscribers, never the newest.
const LOG_RING_CAPACITY: usize = 1024;

/// Scan engine failure surfaced to callers.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyInProgress,
    #[error("folder access denied: {}", .0.display())]
    FolderAccessDenied(PathBuf),
    #[error("no scan is currently running")]
    NotScanning,
    #[error("no scan is currently paused")]
    NotPaused,
    #[error("scan engine has shut down")]
    EngineClosed,
}

/// Engine lifecycle state as published in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Latest scan progress; clients only need the most recent value.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub total: usize,
    pub processed: usize,
    pub current_file: Option<PathBuf>,
    pub state: ScanState,
}

impl ScanProgress {
    fn idle() -> Self {
        Self {
            total: 0,
            processed: 0,
            current_file: None,
            state: ScanState::Idle,
        }
    }
}

/// Severity of a scan log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanLogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl ScanLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanLogLevel::Info => "info",
            ScanLogLevel::Success => "success",
            ScanLogLevel::Warning => "warning",
            ScanLogLevel::Error => "error",
        }
    }
}

/// Structured log entry; entries carrying a file path are actionable by
/// the client (e.g. reveal-in-filesystem).
#[derive(Debug, Clone)]
pub struct ScanLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ScanLogLevel,
    pub message: String,
    pub file_path: Option<PathBuf>,
}

/// Summary emitted once per terminal transition.
#[derive(Debug, Clone)]
pub struct ScanCompletion {
    pub total: usize,
    pub processed: usize,
    pub duration: Duration,
    pub folder_path: PathBuf,
}

/// Offer presented to the client when a resumable checkpoint survives a
/// restart.
#[derive(Debug, Clone)]
pub struct RecoveryInfo {
    pub checkpoint: Checkpoint,
    pub remaining_file_count: usize,
    pub folder_path: PathBuf,
    pub progress_percentage: f64,
}

/// Tunables for the scan pipeline.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum in-flight probe subprocesses.
    pub max_concurrent: usize,
    /// Records buffered before a transactional batch write.
    pub batch_size: usize,
    /// Wall-clock spacing of checkpoint rewrites.
    pub checkpoint_interval: Duration,
    /// Probe retries after the first failed attempt.
    pub retry_limit: u32,
    /// First retry backoff; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Minimum spacing of throttled progress emissions.
    pub progress_throttle: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 12,
            batch_size: 50,
            checkpoint_interval: Duration::from_secs(10),
            retry_limit: 3,
            retry_base_delay: Duration::from_millis(500),
            progress_throttle: Duration::from_millis(100),
        }
    }
}

enum EngineCommand {
    Start {
        folder: PathBuf,
        reply: oneshot::Sender<Result<String, ScanError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
    ResumeFromCheckpoint {
        checkpoint: Checkpoint,
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
}

struct WorkerOutcome {
    path: PathBuf,
    result: Result<VideoMetadata, String>,
}

/// Handle to the scan engine actor.
///
/// Cheap to clone; dropping every handle shuts the actor down once its
/// in-flight work drains.
#[derive(Clone)]
pub struct ScanEngine {
    commands: mpsc::Sender<EngineCommand>,
    progress_rx: watch::Receiver<ScanProgress>,
    log_tx: broadcast::Sender<ScanLogEntry>,
    completion_tx: broadcast::Sender<ScanCompletion>,
}

impl ScanEngine {
    /// Spawn the engine actor.
    pub fn new(
        db: Database,
        probe: ProbeRunner,
        checkpoints: CheckpointStore,
        config: ScanConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (progress_tx, progress_rx) = watch::channel(ScanProgress::idle());
        let (log_tx, _) = broadcast::channel(LOG_RING_CAPACITY);
        let (completion_tx, _) = broadcast::channel(4);
        let (results_tx, results_rx) = mpsc::channel(config.max_concurrent.max(1) * 2);

        let actor = EngineActor {
            db,
            probe: Arc::new(probe),
            checkpoints,
            config,
            state: ScanState::Idle,
            session: None,
            pending: VecDeque::new(),
            in_flight: 0,
            cancel_requested: false,
            paused_quiesced: false,
            buffer: Vec::new(),
            current_file: None,
            results_tx,
            progress_tx,
            log_tx: log_tx.clone(),
            completion_tx: completion_tx.clone(),
            last_checkpoint: Instant::now(),
            last_progress_emit: Instant::now(),
        };
        tokio::spawn(actor.run(command_rx, results_rx));

        Self {
            commands: command_tx,
            progress_rx,
            log_tx,
            completion_tx,
        }
    }

    /// Begin scanning a folder; rejects if a session is already active.
    pub async fn start_scan(&self, folder: impl Into<PathBuf>) -> Result<String, ScanError> {
        self.request(|reply| EngineCommand::Start {
            folder: folder.into(),
            reply,
        })
        .await?
    }

    /// Quiesce producers and persist a checkpoint; in-flight probes run to
    /// completion.
    pub async fn pause(&self) -> Result<(), ScanError> {
        self.request(|reply| EngineCommand::Pause { reply }).await?
    }

    /// Restart production from the in-memory pending list.
    pub async fn resume(&self) -> Result<(), ScanError> {
        self.request(|reply| EngineCommand::Resume { reply }).await?
    }

    /// Stop scheduling work and move to `cancelled` once in-flight probes
    /// return.
    pub async fn cancel(&self) -> Result<(), ScanError> {
        self.request(|reply| EngineCommand::Cancel { reply }).await?
    }

    /// Rehydrate a checkpointed session and continue it.
    pub async fn resume_from_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), ScanError> {
        self.request(|reply| EngineCommand::ResumeFromCheckpoint { checkpoint, reply })
            .await?
    }

    /// Latest progress; the receiver always holds the current value.
    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress_rx.clone()
    }

    /// Subscribe to the log stream.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<ScanLogEntry> {
        self.log_tx.subscribe()
    }

    /// Subscribe to terminal completion summaries.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<ScanCompletion> {
        self.completion_tx.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, ScanError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| ScanError::EngineClosed)?;
        reply_rx.await.map_err(|_| ScanError::EngineClosed)
    }
}

#[derive(Clone)]
struct ActiveSession {
    id: String,
    folder: PathBuf,
    total: usize,
    processed: usize,
    started: Instant,
}

struct EngineActor {
    db: Database,
    probe: Arc<ProbeRunner>,
    checkpoints: CheckpointStore,
    config: ScanConfig,
    state: ScanState,
    session: Option<ActiveSession>,
    pending: VecDeque<PathBuf>,
    in_flight: usize,
    cancel_requested: bool,
    paused_quiesced: bool,
    buffer: Vec<CreateVideo>,
    current_file: Option<PathBuf>,
    results_tx: mpsc::Sender<WorkerOutcome>,
    progress_tx: watch::Sender<ScanProgress>,
    log_tx: broadcast::Sender<ScanLogEntry>,
    completion_tx: broadcast::Sender<ScanCompletion>,
    last_checkpoint: Instant,
    last_progress_emit: Instant,
}

impl EngineActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut results_rx: mpsc::Receiver<WorkerOutcome>,
    ) {
        let mut tick = tokio::time::interval(self.config.checkpoint_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                outcome = results_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_outcome(outcome).await;
                    }
                }
                _ = tick.tick() => self.on_tick().await,
            }

            self.dispatch();
            self.maybe_finalize().await;
        }

        debug!("Scan engine actor shutting down");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start { folder, reply } => {
                let _ = reply.send(self.start(folder).await);
            }
            EngineCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            EngineCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            EngineCommand::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            EngineCommand::ResumeFromCheckpoint { checkpoint, reply } => {
                let _ = reply.send(self.resume_from_checkpoint(checkpoint).await);
            }
        }
    }

    async fn start(&mut self, folder: PathBuf) -> Result<String, ScanError> {
        if matches!(self.state, ScanState::Scanning | ScanState::Paused) {
            return Err(ScanError::AlreadyInProgress);
        }

        info!(folder = %folder.display(), "Starting scan");
        let walk_root = folder.clone();
        let discovered = tokio::task::spawn_blocking(move || discover_files(&walk_root))
            .await
            .map_err(|_| ScanError::FolderAccessDenied(folder.clone()))??;

        let total = discovered.len();
        let session_id = Uuid::new_v4().to_string();
        let pending_strings: Vec<String> = discovered
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        if let Err(e) = self
            .db
            .sessions()
            .create(&CreateScanSession {
                id: session_id.clone(),
                folder_path: folder.to_string_lossy().to_string(),
                total_files: total as i64,
                pending_files: pending_strings,
            })
            .await
        {
            warn!(error = %e, "Failed to persist scan session; continuing without it");
        }

        self.session = Some(ActiveSession {
            id: session_id.clone(),
            folder: folder.clone(),
            total,
            processed: 0,
            started: Instant::now(),
        });
        self.pending = discovered.into();
        self.buffer.clear();
        self.in_flight = 0;
        self.cancel_requested = false;
        self.paused_quiesced = false;
        self.current_file = None;
        self.state = ScanState::Scanning;
        self.last_checkpoint = Instant::now();

        if total == 0 {
            self.log(
                ScanLogLevel::Warning,
                format!("No video files found in {}", folder.display()),
                None,
            );
        } else {
            self.log(
                ScanLogLevel::Info,
                format!("Discovered {total} video files in {}", folder.display()),
                None,
            );
        }
        self.emit_progress(true);

        Ok(session_id)
    }

    async fn pause(&mut self) -> Result<(), ScanError> {
        if self.state != ScanState::Scanning || self.cancel_requested {
            return Err(ScanError::NotScanning);
        }

        self.state = ScanState::Paused;
        self.paused_quiesced = false;
        self.flush_buffer().await;
        self.persist_session(ScanSessionStatus::Paused).await;
        self.write_checkpoint().await;
        self.log(ScanLogLevel::Info, "Scan paused", None);
        self.emit_progress(true);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), ScanError> {
        if self.state != ScanState::Paused {
            return Err(ScanError::NotPaused);
        }

        self.state = ScanState::Scanning;
        self.persist_session(ScanSessionStatus::InProgress).await;
        self.log(ScanLogLevel::Info, "Scan resumed", None);
        self.emit_progress(true);
        Ok(())
    }

    fn cancel(&mut self) -> Result<(), ScanError> {
        if !matches!(self.state, ScanState::Scanning | ScanState::Paused) {
            return Err(ScanError::NotScanning);
        }

        self.cancel_requested = true;
        self.state = ScanState::Scanning;
        self.log(ScanLogLevel::Info, "Cancelling scan", None);
        Ok(())
    }

    async fn resume_from_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<(), ScanError> {
        if matches!(self.state, ScanState::Scanning | ScanState::Paused) {
            return Err(ScanError::AlreadyInProgress);
        }

        info!(
            session_id = %checkpoint.session_id,
            remaining = checkpoint.pending_file_paths.len(),
            "Resuming scan from checkpoint"
        );

        // Paths that vanished while we were down are accounted as failed so
        // the processed/pending arithmetic still adds up to the old total.
        let pending_paths = checkpoint.pending_file_paths.clone();
        let (existing, missing) = tokio::task::spawn_blocking(move || {
            pending_paths
                .into_iter()
                .partition::<Vec<_>, _>(|p| p.is_file())
        })
        .await
        .unwrap_or_else(|_| (checkpoint.pending_file_paths.clone(), Vec::new()));

        for path in &missing {
            self.log(
                ScanLogLevel::Error,
                "File missing on resume; skipping",
                Some(path.clone()),
            );
        }

        self.session = Some(ActiveSession {
            id: checkpoint.session_id.clone(),
            folder: checkpoint.folder_path.clone(),
            total: checkpoint.total_files,
            processed: checkpoint.processed_files + missing.len(),
            started: Instant::now(),
        });
        self.pending = existing.into();
        self.buffer.clear();
        self.in_flight = 0;
        self.cancel_requested = false;
        self.paused_quiesced = false;
        self.current_file = None;
        self.state = ScanState::Scanning;
        self.last_checkpoint = Instant::now();

        self.persist_session(ScanSessionStatus::InProgress).await;
        self.log(
            ScanLogLevel::Info,
            format!(
                "Recovered scan of {} ({} files remaining)",
                checkpoint.folder_path.display(),
                self.pending.len()
            ),
            None,
        );
        self.emit_progress(true);
        Ok(())
    }

    /// Fill free worker slots from the pending queue.
    fn dispatch(&mut self) {
        if self.state != ScanState::Scanning || self.cancel_requested || self.session.is_none() {
            return;
        }

        while self.in_flight < self.config.max_concurrent {
            let Some(path) = self.pending.pop_front() else {
                break;
            };
            self.in_flight += 1;
            self.current_file = Some(path.clone());

            let probe = Arc::clone(&self.probe);
            let results = self.results_tx.clone();
            let log_tx = self.log_tx.clone();
            let retry_limit = self.config.retry_limit;
            let base_delay = self.config.retry_base_delay;
            tokio::spawn(run_worker(
                probe,
                path,
                retry_limit,
                base_delay,
                log_tx,
                results,
            ));
        }

        self.emit_progress(false);
    }

    async fn handle_outcome(&mut self, outcome: WorkerOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.processed += 1;
        let session_id = session.id.clone();

        match outcome.result {
            Ok(meta) => {
                self.log(
                    ScanLogLevel::Success,
                    format!("Catalogued {}", meta.file_name),
                    Some(outcome.path),
                );
                self.buffer
                    .push(CreateVideo::from_metadata(&meta, Some(&session_id)));
                if self.buffer.len() >= self.config.batch_size {
                    self.flush_buffer().await;
                }
            }
            Err(message) => {
                self.log(
                    ScanLogLevel::Error,
                    format!("Failed to analyze file: {message}"),
                    Some(outcome.path),
                );
            }
        }

        self.emit_progress(false);
    }

    async fn on_tick(&mut self) {
        if self.state != ScanState::Scanning || self.cancel_requested || self.session.is_none() {
            return;
        }
        if self.last_checkpoint.elapsed() < self.config.checkpoint_interval {
            return;
        }

        self.flush_buffer().await;
        self.persist_session(ScanSessionStatus::InProgress).await;
        self.write_checkpoint().await;
    }

    /// Drive terminal and quiesce transitions once workers drain.
    async fn maybe_finalize(&mut self) {
        if self.session.is_none() || self.in_flight > 0 {
            return;
        }

        if self.cancel_requested {
            self.finalize(ScanState::Cancelled, ScanSessionStatus::Cancelled)
                .await;
        } else if self.state == ScanState::Scanning && self.pending.is_empty() {
            self.finalize(ScanState::Completed, ScanSessionStatus::Completed)
                .await;
        } else if self.state == ScanState::Paused && !self.paused_quiesced {
            // All in-flight work has landed; persist the now-exact counters
            // and pending list.
            self.paused_quiesced = true;
            self.flush_buffer().await;
            self.persist_session(ScanSessionStatus::Paused).await;
            self.write_checkpoint().await;
        }
    }

    async fn finalize(&mut self, terminal: ScanState, status: ScanSessionStatus) {
        self.flush_buffer().await;
        self.persist_session(status).await;
        if let Err(e) = self.checkpoints.delete().await {
            warn!(error = %e, "Failed to delete checkpoint after terminal transition");
        }

        self.state = terminal;
        self.current_file = None;
        self.cancel_requested = false;
        self.emit_progress(true);

        let Some(session) = self.session.take() else {
            return;
        };
        self.pending.clear();

        let duration = session.started.elapsed();
        let level = if terminal == ScanState::Completed {
            ScanLogLevel::Success
        } else {
            ScanLogLevel::Info
        };
        self.log(
            level,
            format!(
                "Scan {}: {}/{} files in {:.1}s",
                status,
                session.processed,
                session.total,
                duration.as_secs_f64()
            ),
            None,
        );
        let _ = self.completion_tx.send(ScanCompletion {
            total: session.total,
            processed: session.processed,
            duration,
            folder_path: session.folder,
        });
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        let count = batch.len();
        if let Err(e) = self.db.videos().upsert_batch(&batch).await {
            self.log(
                ScanLogLevel::Warning,
                format!("Failed to write a batch of {count} records: {e}"),
                None,
            );
        } else {
            debug!(count, "Flushed insert batch");
        }
    }

    async fn persist_session(&mut self, status: ScanSessionStatus) {
        let Some(session) = &self.session else {
            return;
        };
        let pending: Vec<String> = self
            .pending
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let sessions = self.db.sessions();
        if let Err(e) = sessions
            .update_progress(&session.id, session.processed as i64, &pending, true)
            .await
        {
            warn!(session_id = %session.id, error = %e, "Failed to update session progress");
        }
        if let Err(e) = sessions.set_status(&session.id, status).await {
            warn!(session_id = %session.id, error = %e, "Failed to update session status");
        }
    }

    async fn write_checkpoint(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let checkpoint = Checkpoint {
            session_id: session.id.clone(),
            folder_path: session.folder.clone(),
            total_files: session.total,
            processed_files: session.processed,
            pending_file_paths: self.pending.iter().cloned().collect(),
            saved_at: Utc::now(),
        };

        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            self.log(
                ScanLogLevel::Warning,
                format!("Failed to write checkpoint: {e}"),
                None,
            );
        }
        self.last_checkpoint = Instant::now();
    }

    fn emit_progress(&mut self, force: bool) {
        if !force && self.last_progress_emit.elapsed() < self.config.progress_throttle {
            return;
        }

        let (total, processed) = match &self.session {
            Some(session) => (session.total, session.processed),
            None => {
                let last = self.progress_tx.borrow();
                (last.total, last.processed)
            }
        };
        self.progress_tx.send_replace(ScanProgress {
            total,
            processed,
            current_file: self.current_file.clone(),
            state: self.state,
        });
        self.last_progress_emit = Instant::now();
    }

    fn log(&self, level: ScanLogLevel, message: impl Into<String>, file_path: Option<PathBuf>) {
        send_log(&self.log_tx, level, message.into(), file_path);
    }
}

/// Probe one file with retry and exponential backoff, then parse.
async fn run_worker(
    probe: Arc<ProbeRunner>,
    path: PathBuf,
    retry_limit: u32,
    base_delay: Duration,
    log_tx: broadcast::Sender<ScanLogEntry>,
    results: mpsc::Sender<WorkerOutcome>,
) {
    let mut last_error = String::new();

    for attempt in 0..=retry_limit {
        if attempt > 0 {
            tokio::time::sleep(retry_delay(base_delay, attempt)).await;
        }

        match probe_and_parse(&probe, &path).await {
            Ok(meta) => {
                let _ = results
                    .send(WorkerOutcome {
                        path,
                        result: Ok(meta),
                    })
                    .await;
                return;
            }
            Err(message) => {
                if attempt < retry_limit {
                    send_log(
                        &log_tx,
                        ScanLogLevel::Warning,
                        format!(
                            "Probe attempt {} of {} failed: {message}",
                            attempt + 1,
                            retry_limit + 1
                        ),
                        Some(path.clone()),
                    );
                }
                last_error = message;
            }
        }
    }

    let _ = results
        .send(WorkerOutcome {
            path,
            result: Err(last_error),
        })
        .await;
}

async fn probe_and_parse(probe: &ProbeRunner, path: &Path) -> Result<VideoMetadata, String> {
    let file_size = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("stat failed: {e}"))?
        .len();
    let output = probe.probe(path).await.map_err(|e| e.to_string())?;
    Ok(metadata::parse(&output, path, file_size))
}

/// Backoff before retry `attempt` (1-based): base, 2x base, 4x base, ...
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

fn send_log(
    tx: &broadcast::Sender<ScanLogEntry>,
    level: ScanLogLevel,
    message: String,
    file_path: Option<PathBuf>,
) {
    match level {
        ScanLogLevel::Info | ScanLogLevel::Success => {
            info!(file = ?file_path, "{message}");
        }
        ScanLogLevel::Warning => warn!(file = ?file_path, "{message}"),
        ScanLogLevel::Error => error!(file = ?file_path, "{message}"),
    }
    let _ = tx.send(ScanLogEntry {
        timestamp: Utc::now(),
        level,
        message,
        file_path,
    });
}

/// Recursively enumerate video files under `root`.
///
/// Hidden entries and bundle directories are skipped entirely; remaining
/// regular files are kept when their extension is in the supported set.
fn discover_files(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if std::fs::read_dir(root).is_err() {
        return Err(ScanError::FolderAccessDenied(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !is_bundle(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn is_bundle(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| BUNDLE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
}

/// Inspect the checkpoint store at startup.
///
/// Returns a recovery offer when a fresh checkpoint still resolves: its
/// folder exists and at least one pending file is still on disk. Stale or
/// unresolvable checkpoints are pruned and their sessions marked failed.
pub async fn check_recovery(
    checkpoints: &CheckpointStore,
    db: &Database,
    stale_age: Duration,
) -> Option<RecoveryInfo> {
    let checkpoint = checkpoints.load().await?;

    if checkpoint.is_stale(stale_age) {
        info!(
            session_id = %checkpoint.session_id,
            saved_at = %checkpoint.saved_at,
            "Pruning stale checkpoint"
        );
        mark_session_failed(db, &checkpoint.session_id).await;
        let _ = checkpoints.delete().await;
        return None;
    }

    let folder_exists = checkpoint.folder_path.is_dir();
    let any_pending_exists = checkpoint.pending_file_paths.iter().any(|p| p.is_file());
    if !folder_exists || !any_pending_exists {
        info!(
            session_id = %checkpoint.session_id,
            folder = %checkpoint.folder_path.display(),
            "Checkpoint no longer resolves; pruning"
        );
        mark_session_failed(db, &checkpoint.session_id).await;
        let _ = checkpoints.delete().await;
        return None;
    }

    Some(RecoveryInfo {
        remaining_file_count: checkpoint.pending_file_paths.len(),
        folder_path: checkpoint.folder_path.clone(),
        progress_percentage: checkpoint.progress_percentage(),
        checkpoint,
    })
}

/// Dismiss a recovery offer: delete the checkpoint and fail its session.
pub async fn discard_recovery(
    checkpoints: &CheckpointStore,
    db: &Database,
    checkpoint: &Checkpoint,
) -> anyhow::Result<()> {
    mark_session_failed(db, &checkpoint.session_id).await;
    checkpoints.delete().await
}

async fn mark_session_failed(db: &Database, session_id: &str) {
    if let Err(e) = db
        .sessions()
        .set_status(session_id, ScanSessionStatus::Failed)
        .await
    {
        warn!(session_id = %session_id, error = %e, "Failed to mark session failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_schedule() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 3), Duration::from_secs(2));
    }

    #[test]
    fn test_discovery_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::write(root.join("film.mkv"), b"x").unwrap();
        std::fs::write(root.join("clip.MP4"), b"x").unwrap();
        std::fs::write(root.join("notes.txt"), b"x").unwrap();
        std::fs::write(root.join(".hidden.mkv"), b"x").unwrap();

        std::fs::create_dir(root.join("season1")).unwrap();
        std::fs::write(root.join("season1/ep1.m2ts"), b"x").unwrap();

        std::fs::create_dir(root.join(".cache")).unwrap();
        std::fs::write(root.join(".cache/buried.mkv"), b"x").unwrap();

        std::fs::create_dir(root.join("Player.app")).unwrap();
        std::fs::write(root.join("Player.app/embedded.mp4"), b"x").unwrap();

        let mut found: Vec<String> = discover_files(root)
            .unwrap()
            .into_iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        found.sort();

        assert_eq!(found, vec!["clip.MP4", "film.mkv", "season1/ep1.m2ts"]);
    }

    #[test]
    fn test_discovery_missing_root_is_denied() {
        let err = discover_files(Path::new("/definitely/not/a/real/folder")).unwrap_err();
        assert!(matches!(err, ScanError::FolderAccessDenied(_)));
    }

    #[test]
    fn test_empty_folder_discovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_files(dir.path()).unwrap().is_empty());
    }
}
