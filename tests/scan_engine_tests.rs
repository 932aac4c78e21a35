//! End-to-end scan engine tests driven by a mock ffprobe script.
//!
//! The mock emits canned ffprobe JSON (or fails, or stalls), which lets the
//! full discovery -> probe -> parse -> persist pipeline run without real
//! media files or a real ffmpeg install.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use video_analyzer::db::{Database, ResolutionCategory, ScanSessionStatus};
use video_analyzer::services::checkpoint::{Checkpoint, CheckpointStore};
use video_analyzer::services::metadata::{AudioCodec, HdrFormat, VideoCodec};
use video_analyzer::services::probe::ProbeRunner;
use video_analyzer::services::scanner::{
    self, ScanCompletion, ScanConfig, ScanEngine, ScanError, ScanLogLevel, ScanState,
};

const HDR10_ATMOS_JSON: &str = r#"{
  "format": {
    "filename": "ignored",
    "format_name": "matroska,webm",
    "duration": "5400.000000",
    "size": "5",
    "bit_rate": "24000000"
  },
  "streams": [
    {
      "index": 0,
      "codec_type": "video",
      "codec_name": "hevc",
      "width": 3840,
      "height": 2160,
      "pix_fmt": "yuv420p10le",
      "color_transfer": "smpte2084",
      "color_primaries": "bt2020nc",
      "bits_per_raw_sample": "10",
      "avg_frame_rate": "24000/1001",
      "bit_rate": "18000000"
    },
    {
      "index": 1,
      "codec_type": "audio",
      "codec_name": "truehd",
      "profile": "Dolby TrueHD + Dolby Atmos",
      "channels": 8,
      "channel_layout": "7.1",
      "sample_rate": "48000"
    }
  ]
}"#;

fn write_mock_probe(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ffprobe");
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn ok_probe(dir: &Path) -> PathBuf {
    write_mock_probe(dir, &format!("#!/bin/sh\ncat <<'EOF'\n{HDR10_ATMOS_JSON}\nEOF\n"))
}

fn slow_probe(dir: &Path, delay: &str) -> PathBuf {
    write_mock_probe(
        dir,
        &format!("#!/bin/sh\nsleep {delay}\ncat <<'EOF'\n{HDR10_ATMOS_JSON}\nEOF\n"),
    )
}

fn failing_probe(dir: &Path) -> PathBuf {
    write_mock_probe(dir, "#!/bin/sh\necho 'mock probe failure' >&2\nexit 1\n")
}

fn fast_config() -> ScanConfig {
    ScanConfig {
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

async fn open_db() -> Database {
    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn build_engine(
    db: &Database,
    data_dir: &Path,
    probe_path: &Path,
    config: ScanConfig,
) -> (ScanEngine, CheckpointStore) {
    let probe = ProbeRunner::new(Some(probe_path), Duration::from_secs(10)).unwrap();
    let checkpoints = CheckpointStore::new(data_dir);
    let engine = ScanEngine::new(db.clone(), probe, checkpoints.clone(), config);
    (engine, checkpoints)
}

async fn recv_completion(rx: &mut broadcast::Receiver<ScanCompletion>) -> ScanCompletion {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("completion channel closed")
}

fn seed_media_files(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("file{i:02}.mkv"));
            std::fs::write(&path, b"fake!").unwrap();
            path
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_folder_scan() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();

    let db = open_db().await;
    let (engine, checkpoints) =
        build_engine(&db, data.path(), &ok_probe(tools.path()), fast_config());
    let mut completions = engine.subscribe_completions();

    let session_id = engine.start_scan(media.path()).await.unwrap();
    let completion = recv_completion(&mut completions).await;

    assert_eq!(completion.total, 0);
    assert_eq!(completion.processed, 0);
    assert_eq!(db.videos().count().await.unwrap(), 0);
    assert!(!checkpoints.exists());

    let session = db.sessions().get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Completed);
    assert!(session.completed_at.is_some());

    // Exactly one completion event per terminal transition.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        completions.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scan_catalogs_probed_metadata() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let files = seed_media_files(media.path(), 3);

    let db = open_db().await;
    let (engine, checkpoints) =
        build_engine(&db, data.path(), &ok_probe(tools.path()), fast_config());
    let mut completions = engine.subscribe_completions();

    let session_id = engine.start_scan(media.path()).await.unwrap();
    let completion = recv_completion(&mut completions).await;

    assert_eq!(completion.total, 3);
    assert_eq!(completion.processed, 3);
    assert_eq!(db.videos().count().await.unwrap(), 3);
    assert!(!checkpoints.exists());

    let record = db
        .videos()
        .get_by_path(files[0].to_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.video_codec, VideoCodec::Hevc);
    assert_eq!(record.hdr_format, HdrFormat::Hdr10);
    assert_eq!(record.width, Some(3840));
    assert_eq!(record.height, Some(2160));
    assert_eq!(record.resolution_category(), Some(ResolutionCategory::K4));
    assert_eq!(record.audio_codec, AudioCodec::TrueHd);
    assert!(record.is_atmos);
    assert!(!record.is_dtsx);
    assert_eq!(record.bit_depth, Some(10));
    assert_eq!(record.file_size, 5);
    assert_eq!(record.scan_session_id.as_deref(), Some(session_id.as_str()));

    let progress = engine.progress().borrow().clone();
    assert_eq!(progress.state, ScanState::Completed);
    assert_eq!(progress.processed, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rescan_replaces_rather_than_duplicates() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    seed_media_files(media.path(), 2);

    let db = open_db().await;
    let (engine, _) = build_engine(&db, data.path(), &ok_probe(tools.path()), fast_config());
    let mut completions = engine.subscribe_completions();

    engine.start_scan(media.path()).await.unwrap();
    recv_completion(&mut completions).await;
    engine.start_scan(media.path()).await.unwrap();
    recv_completion(&mut completions).await;

    // file_path stays unique across re-scans.
    assert_eq!(db.videos().count().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_failures_are_retried_then_logged() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    seed_media_files(media.path(), 2);

    let db = open_db().await;
    let (engine, _) = build_engine(&db, data.path(), &failing_probe(tools.path()), fast_config());
    let mut completions = engine.subscribe_completions();
    let mut logs = engine.subscribe_logs();

    engine.start_scan(media.path()).await.unwrap();
    let completion = recv_completion(&mut completions).await;

    // Every file was taken responsibility for, none produced a record.
    assert_eq!(completion.processed, 2);
    assert_eq!(completion.total, 2);
    assert_eq!(db.videos().count().await.unwrap(), 0);

    let mut retry_warnings = 0;
    let mut file_errors = 0;
    while let Ok(entry) = logs.try_recv() {
        match entry.level {
            ScanLogLevel::Warning if entry.file_path.is_some() => retry_warnings += 1,
            ScanLogLevel::Error if entry.file_path.is_some() => file_errors += 1,
            _ => {}
        }
    }
    // 3 retries per file surface as warnings; exhaustion surfaces as one
    // error entry per file with the path attached.
    assert_eq!(file_errors, 2);
    assert_eq!(retry_warnings, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_checkpoint_resume() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    seed_media_files(media.path(), 8);

    let db = open_db().await;
    let config = ScanConfig {
        max_concurrent: 2,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let (engine, checkpoints) =
        build_engine(&db, data.path(), &slow_probe(tools.path(), "0.4"), config);
    let mut completions = engine.subscribe_completions();

    // Watch that published progress counts never go backwards.
    let mut progress_rx = engine.progress();
    let monotonic = tokio::spawn(async move {
        let mut last = 0;
        let mut ok = true;
        while progress_rx.changed().await.is_ok() {
            let processed = progress_rx.borrow().processed;
            if processed < last {
                ok = false;
            }
            last = processed;
        }
        ok
    });

    let session_id = engine.start_scan(media.path()).await.unwrap();

    let mut rx = engine.progress();
    tokio::time::timeout(Duration::from_secs(30), async {
        while rx.borrow().processed < 1 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("no progress before pause");

    engine.pause().await.unwrap();
    assert_eq!(engine.progress().borrow().state, ScanState::Paused);
    assert!(checkpoints.exists());

    // Once in-flight probes drain, the checkpoint accounts for every file:
    // processed + pending == total.
    let store = checkpoints.clone();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Some(cp) = store.load().await {
                if cp.processed_files + cp.pending_file_paths.len() == cp.total_files {
                    break cp;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("checkpoint never quiesced");

    let paused_session = db.sessions().get(&session_id).await.unwrap().unwrap();
    assert_eq!(paused_session.status, ScanSessionStatus::Paused);
    let paused_processed = engine.progress().borrow().processed;
    assert!(paused_processed < 8);

    engine.resume().await.unwrap();
    let completion = recv_completion(&mut completions).await;

    assert_eq!(completion.total, 8);
    assert_eq!(completion.processed, 8);
    assert_eq!(db.videos().count().await.unwrap(), 8);
    assert!(!checkpoints.exists());

    let session = db.sessions().get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Completed);

    drop(engine);
    assert!(monotonic.await.unwrap(), "processed count went backwards");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_stops_scheduling_and_terminates() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    seed_media_files(media.path(), 8);

    let db = open_db().await;
    let config = ScanConfig {
        max_concurrent: 2,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let (engine, checkpoints) =
        build_engine(&db, data.path(), &slow_probe(tools.path(), "0.3"), config);
    let mut completions = engine.subscribe_completions();

    let session_id = engine.start_scan(media.path()).await.unwrap();

    let mut rx = engine.progress();
    tokio::time::timeout(Duration::from_secs(30), async {
        while rx.borrow().processed < 1 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("no progress before cancel");

    engine.cancel().await.unwrap();
    let completion = recv_completion(&mut completions).await;

    // In-flight work ran to completion, queued work was abandoned.
    assert!(completion.processed < completion.total);
    assert_eq!(completion.total, 8);
    assert!(!checkpoints.exists());
    assert_eq!(engine.progress().borrow().state, ScanState::Cancelled);

    let session = db.sessions().get(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Cancelled);
    assert!(session.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lifecycle_commands_reject_wrong_state() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    seed_media_files(media.path(), 4);

    let db = open_db().await;
    let (engine, _) = build_engine(
        &db,
        data.path(),
        &slow_probe(tools.path(), "0.3"),
        fast_config(),
    );
    let mut completions = engine.subscribe_completions();

    assert!(matches!(engine.pause().await, Err(ScanError::NotScanning)));
    assert!(matches!(engine.resume().await, Err(ScanError::NotPaused)));
    assert!(matches!(engine.cancel().await, Err(ScanError::NotScanning)));

    engine.start_scan(media.path()).await.unwrap();
    assert!(matches!(
        engine.start_scan(media.path()).await,
        Err(ScanError::AlreadyInProgress)
    ));

    engine.cancel().await.unwrap();
    recv_completion(&mut completions).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nonexistent_folder_is_access_denied() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let db = open_db().await;
    let (engine, _) = build_engine(&db, data.path(), &ok_probe(tools.path()), fast_config());

    let result = engine.start_scan("/definitely/not/a/real/folder").await;
    assert!(matches!(result, Err(ScanError::FolderAccessDenied(_))));
    assert_eq!(engine.progress().borrow().state, ScanState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_from_checkpoint_completes_old_session() {
    let tools = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let files = seed_media_files(media.path(), 2);

    let db = open_db().await;
    db.sessions()
        .create(&video_analyzer::db::CreateScanSession {
            id: "recovered-session".to_string(),
            folder_path: media.path().to_string_lossy().to_string(),
            total_files: 10,
            pending_files: vec![],
        })
        .await
        .unwrap();

    // 7 processed before the crash; 2 survivors plus one path that has
    // since vanished.
    let checkpoint = Checkpoint {
        session_id: "recovered-session".to_string(),
        folder_path: media.path().to_path_buf(),
        total_files: 10,
        processed_files: 7,
        pending_file_paths: vec![
            files[0].clone(),
            files[1].clone(),
            media.path().join("vanished.mkv"),
        ],
        saved_at: chrono::Utc::now(),
    };

    let (engine, checkpoints) =
        build_engine(&db, data.path(), &ok_probe(tools.path()), fast_config());
    checkpoints.save(&checkpoint).await.unwrap();
    let mut completions = engine.subscribe_completions();

    engine.resume_from_checkpoint(checkpoint).await.unwrap();
    let completion = recv_completion(&mut completions).await;

    // 7 prior + 1 vanished (counted as failed) + 2 scanned.
    assert_eq!(completion.total, 10);
    assert_eq!(completion.processed, 10);
    assert_eq!(db.videos().count().await.unwrap(), 2);
    assert!(!checkpoints.exists());

    let session = db.sessions().get("recovered-session").await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_recovery_offers_resumable_checkpoint() {
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let files = seed_media_files(media.path(), 3);

    let db = open_db().await;
    let checkpoints = CheckpointStore::new(data.path());
    db.sessions()
        .create(&video_analyzer::db::CreateScanSession {
            id: "s1".to_string(),
            folder_path: media.path().to_string_lossy().to_string(),
            total_files: 100,
            pending_files: vec![],
        })
        .await
        .unwrap();

    let checkpoint = Checkpoint {
        session_id: "s1".to_string(),
        folder_path: media.path().to_path_buf(),
        total_files: 100,
        processed_files: 40,
        pending_file_paths: files.clone(),
        saved_at: chrono::Utc::now(),
    };
    checkpoints.save(&checkpoint).await.unwrap();

    let info = scanner::check_recovery(&checkpoints, &db, Duration::from_secs(24 * 3600))
        .await
        .expect("expected a recovery offer");
    assert_eq!(info.remaining_file_count, 3);
    assert_eq!(info.folder_path, media.path());
    assert!((info.progress_percentage - 40.0).abs() < 1e-9);

    // Dismissal deletes the checkpoint and fails the session.
    scanner::discard_recovery(&checkpoints, &db, &info.checkpoint)
        .await
        .unwrap();
    assert!(!checkpoints.exists());
    let session = db.sessions().get("s1").await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_recovery_prunes_stale_checkpoint() {
    let data = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let files = seed_media_files(media.path(), 1);

    let db = open_db().await;
    let checkpoints = CheckpointStore::new(data.path());
    db.sessions()
        .create(&video_analyzer::db::CreateScanSession {
            id: "stale".to_string(),
            folder_path: media.path().to_string_lossy().to_string(),
            total_files: 10,
            pending_files: vec![],
        })
        .await
        .unwrap();

    let checkpoint = Checkpoint {
        session_id: "stale".to_string(),
        folder_path: media.path().to_path_buf(),
        total_files: 10,
        processed_files: 5,
        pending_file_paths: files,
        saved_at: chrono::Utc::now() - chrono::Duration::hours(25),
    };
    checkpoints.save(&checkpoint).await.unwrap();

    let info = scanner::check_recovery(&checkpoints, &db, Duration::from_secs(24 * 3600)).await;
    assert!(info.is_none());
    assert!(!checkpoints.exists());
    let session = db.sessions().get("stale").await.unwrap().unwrap();
    assert_eq!(session.status, ScanSessionStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_recovery_prunes_unresolvable_checkpoint() {
    let data = tempfile::tempdir().unwrap();

    let db = open_db().await;
    let checkpoints = CheckpointStore::new(data.path());

    let checkpoint = Checkpoint {
        session_id: "gone".to_string(),
        folder_path: PathBuf::from("/no/such/folder"),
        total_files: 10,
        processed_files: 5,
        pending_file_paths: vec![PathBuf::from("/no/such/folder/a.mkv")],
        saved_at: chrono::Utc::now(),
    };
    checkpoints.save(&checkpoint).await.unwrap();

    let info = scanner::check_recovery(&checkpoints, &db, Duration::from_secs(24 * 3600)).await;
    assert!(info.is_none());
    assert!(!checkpoints.exists());
}
