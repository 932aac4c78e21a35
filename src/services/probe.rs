//! ffprobe process wrapper
//!
//! Spawns the probe binary with a fixed argument profile, bounds its
//! runtime with a hard wall-clock timeout and maps the JSON report into
//! typed structures. The probe/analyze byte caps trade completeness for
//! latency on large or network-resident files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::debug;

/// Default wall-clock limit for a single probe invocation.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Bytes ffprobe may read for format detection.
const PROBE_SIZE_BYTES: &str = "5000000";

/// Microseconds of stream data ffprobe may analyze.
const ANALYZE_DURATION_US: &str = "5000000";

/// How much trailing stderr is kept on a non-zero exit.
const STDERR_TAIL_CHARS: usize = 400;

/// Per-file probe failure. All variants are non-fatal to a scan.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe binary not found (looked beside the executable, in system locations and on PATH)")]
    NotFound,
    #[error("failed to start ffprobe: {0}")]
    ProcessStartFailed(#[source] std::io::Error),
    #[error("ffprobe timed out for {}", path.display())]
    Timeout { path: PathBuf },
    #[error("ffprobe exited with status {code}: {stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },
    #[error("failed to parse ffprobe output: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Parsed ffprobe JSON report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOutput {
    pub format: Option<ProbeFormat>,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

/// Container-level fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub filename: Option<String>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level fields; ffprobe reports most numbers as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: i64,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub profile: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub coded_width: Option<i64>,
    pub coded_height: Option<i64>,
    pub pix_fmt: Option<String>,
    pub color_range: Option<String>,
    pub color_space: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub bit_rate: Option<String>,
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    pub sample_rate: Option<String>,
    pub side_data_list: Option<Vec<SideData>>,
    pub tags: Option<HashMap<String, String>>,
    pub disposition: Option<Disposition>,
}

/// Auxiliary per-stream payload descriptors; the primary evidence for
/// Dolby Vision and HDR10+ enhancement layers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideData {
    pub side_data_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Disposition {
    pub default: Option<i64>,
    pub forced: Option<i64>,
    pub comment: Option<i64>,
}

/// Locate an external tool by name.
///
/// Resolution order: explicitly configured path, a copy bundled next to the
/// executable, the conventional system install locations, then PATH.
pub fn resolve_tool(name: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join(name);
            if bundled.is_file() {
                return Some(bundled);
            }
        }
    }

    for dir in ["/usr/local/bin", "/opt/homebrew/bin"] {
        let candidate = Path::new(dir).join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    find_in_path(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// ffprobe wrapper with a bounded runtime per invocation.
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl ProbeRunner {
    /// Resolve the ffprobe binary and build a runner.
    pub fn new(configured: Option<&Path>, timeout: Duration) -> Result<Self, ProbeError> {
        let binary = resolve_tool("ffprobe", configured).ok_or(ProbeError::NotFound)?;
        Ok(Self { binary, timeout })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check that the resolved binary actually runs.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Probe a single file.
    ///
    /// On timeout the child gets SIGTERM, then SIGKILL if it is still alive
    /// after a short grace period; probes of network-mounted files can hang
    /// in uninterruptible I/O otherwise.
    pub async fn probe(&self, path: &Path) -> Result<ProbeOutput, ProbeError> {
        debug!(path = %path.display(), "Probing media file");

        let mut child = Command::new(&self.binary)
            .args(["-v", "quiet"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .args(["-probesize", PROBE_SIZE_BYTES])
            .args(["-analyzeduration", ANALYZE_DURATION_US])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProbeError::ProcessStartFailed)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut out_pipe = child.stdout.take();
        let mut err_pipe = child.stderr.take();

        let wait_and_drain = async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                async {
                    if let Some(pipe) = out_pipe.as_mut() {
                        let _ = pipe.read_to_end(&mut stdout).await;
                    }
                },
                async {
                    if let Some(pipe) = err_pipe.as_mut() {
                        let _ = pipe.read_to_end(&mut stderr).await;
                    }
                },
            );
            status
        };

        let waited = tokio::time::timeout(self.timeout, wait_and_drain).await;
        let status = match waited {
            Ok(status) => status.map_err(ProbeError::ProcessStartFailed)?,
            Err(_) => {
                terminate(&mut child).await;
                return Err(ProbeError::Timeout {
                    path: path.to_path_buf(),
                });
            }
        };

        if !status.success() {
            let text = String::from_utf8_lossy(&stderr);
            return Err(ProbeError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr_tail: tail(text.trim(), STDERR_TAIL_CHARS),
            });
        }

        Ok(serde_json::from_slice(&stdout)?)
    }
}

/// Graceful-then-forceful shutdown of a timed-out child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            tokio::time::sleep(KILL_GRACE).await;
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
