//! Video Analyzer - command-line front-end
//!
//! Thin client over the library surface: wires configuration, the catalog
//! store and the services together, then drives one command to completion
//! while relaying the engine's event streams to the terminal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use video_analyzer::cli::{Command, RecoveryChoice, USAGE};
use video_analyzer::config::Config;
use video_analyzer::db::{Database, VideoFilter};
use video_analyzer::services::checkpoint::CheckpointStore;
use video_analyzer::services::duplicates::{DuplicateDetector, DuplicateMethod};
use video_analyzer::services::integrity::IntegrityChecker;
use video_analyzer::services::probe::ProbeRunner;
use video_analyzer::services::scanner::{self, ScanEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let command = match Command::from_args() {
        Ok(Command::Help) => {
            print!("{USAGE}");
            return Ok(());
        }
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "video_analyzer=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("create data directory {}", config.data_dir.display()))?;

    let db = Database::connect(&config.database_path).await?;
    db.migrate().await?;

    let outcome = match command {
        Command::Scan { folder, recovery } => run_scan(&config, &db, folder, recovery).await,
        Command::Stats => run_stats(&db).await,
        Command::Duplicates { method } => run_duplicates(&db, method).await,
        Command::Verify => run_verify(&config, &db).await,
        Command::Help => unreachable!("handled before startup"),
    };

    db.close().await;
    outcome
}

async fn run_scan(
    config: &Config,
    db: &Database,
    folder: PathBuf,
    recovery_choice: RecoveryChoice,
) -> Result<()> {
    let checkpoints = CheckpointStore::new(&config.data_dir);
    let recovery = scanner::check_recovery(&checkpoints, db, config.stale_checkpoint_age).await;

    let probe = ProbeRunner::new(config.ffprobe_path.as_deref(), config.probe_timeout)?;
    let engine = ScanEngine::new(
        db.clone(),
        probe,
        checkpoints.clone(),
        config.scan.clone(),
    );
    let mut completions = engine.subscribe_completions();

    let mut logs = engine.subscribe_logs();
    let printer = tokio::spawn(async move {
        loop {
            match logs.recv().await {
                Ok(entry) => {
                    let path = entry
                        .file_path
                        .map(|p| format!(" ({})", p.display()))
                        .unwrap_or_default();
                    println!(
                        "[{}] {:<7} {}{}",
                        entry.timestamp.format("%H:%M:%S"),
                        entry.level.as_str(),
                        entry.message,
                        path
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    match recovery {
        Some(info) => match recovery_choice {
            RecoveryChoice::Resume => {
                println!(
                    "Resuming interrupted scan of {}: {} files remaining ({:.0}% complete)",
                    info.folder_path.display(),
                    info.remaining_file_count,
                    info.progress_percentage
                );
                engine.resume_from_checkpoint(info.checkpoint).await?;
            }
            RecoveryChoice::Discard => {
                scanner::discard_recovery(&checkpoints, db, &info.checkpoint).await?;
                println!("Discarded interrupted scan; starting fresh.");
                engine.start_scan(folder).await?;
            }
            RecoveryChoice::Ask => {
                println!(
                    "An interrupted scan of {} was found: {} files remaining ({:.0}% complete).",
                    info.folder_path.display(),
                    info.remaining_file_count,
                    info.progress_percentage
                );
                println!("Re-run with --resume to continue it, or --discard to drop it.");
                printer.abort();
                return Ok(());
            }
        },
        None => {
            engine.start_scan(folder).await?;
        }
    }

    let completion = completions
        .recv()
        .await
        .context("scan engine terminated before completing")?;
    printer.abort();

    println!(
        "Processed {}/{} files from {} in {:.1}s",
        completion.processed,
        completion.total,
        completion.folder_path.display(),
        completion.duration.as_secs_f64()
    );
    println!("Catalog now holds {} videos.", db.videos().count().await?);
    Ok(())
}

async fn run_stats(db: &Database) -> Result<()> {
    let stats = db.videos().fetch_statistics().await?;

    println!(
        "Catalog: {} videos, {}, {:.1} hours",
        stats.total_videos,
        format_bytes(stats.total_size_bytes),
        stats.total_duration_seconds / 3600.0
    );
    print_buckets("Video codecs", &stats.by_video_codec);
    print_buckets("HDR formats", &stats.by_hdr_format);
    print_buckets("Audio codecs", &stats.by_audio_codec);
    print_buckets("Containers", &stats.by_container);
    print_buckets("Resolutions", &stats.by_resolution);
    println!(
        "Immersive audio: {} Atmos, {} DTS:X",
        stats.atmos_count, stats.dtsx_count
    );
    Ok(())
}

async fn run_duplicates(db: &Database, method: DuplicateMethod) -> Result<()> {
    let records = db.videos().fetch_filtered(&VideoFilter::default()).await?;
    if records.is_empty() {
        println!("Catalog is empty; run a scan first.");
        return Ok(());
    }

    println!("Scanning {} records for duplicates ({method})...", records.len());
    let detector = DuplicateDetector::new();
    let groups = detector.detect(records, method).await;

    if groups.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }

    let total_savings: i64 = groups.iter().map(|g| g.potential_savings()).sum();
    for (i, group) in groups.iter().enumerate() {
        println!(
            "Group {} ({} files, confidence {:.2}, reclaimable {}):",
            i + 1,
            group.files.len(),
            group.confidence,
            format_bytes(group.potential_savings())
        );
        for file in &group.files {
            println!("  {} ({})", file.file_path, format_bytes(file.file_size));
        }
    }
    println!(
        "{} duplicate groups; {} reclaimable in total.",
        groups.len(),
        format_bytes(total_savings)
    );
    Ok(())
}

async fn run_verify(config: &Config, db: &Database) -> Result<()> {
    let records = db.videos().fetch_filtered(&VideoFilter::default()).await?;
    if records.is_empty() {
        println!("Catalog is empty; run a scan first.");
        return Ok(());
    }

    let checker = IntegrityChecker::new(
        config.ffmpeg_path.as_deref(),
        config.integrity_max_concurrent,
    )?;
    println!("Decoding {} files to verify integrity...", records.len());

    let results = checker.check_all(&records).await;

    let videos = db.videos();
    let mut corrupted = 0;
    for result in &results {
        let details = (!result.errors.is_empty())
            .then(|| serde_json::to_string(&result.errors).unwrap_or_default());
        if let Err(e) = videos
            .mark_corruption(result.record_id, result.is_corrupted, details.as_deref())
            .await
        {
            warn!(path = %result.file_path.display(), error = %e, "Failed to record integrity result");
        }

        if result.is_corrupted {
            corrupted += 1;
            println!("CORRUPTED: {}", result.file_path.display());
            for error in &result.errors {
                match error.timestamp {
                    Some(ts) => println!("  [{}] {} (at {ts:.2}s)", error.error_type, error.message),
                    None => println!("  [{}] {}", error.error_type, error.message),
                }
            }
        }
    }

    println!("{corrupted} of {} files corrupted.", results.len());
    Ok(())
}

fn print_buckets(title: &str, buckets: &[(String, i64)]) {
    if buckets.is_empty() {
        return;
    }
    println!("{title}:");
    for (name, count) in buckets {
        println!("  {name:<20} {count}");
    }
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes.max(0))
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
