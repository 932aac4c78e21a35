//! Probe output interpretation
//!
//! Pure functions that turn a raw ffprobe report plus filesystem stats into
//! a normalized [`VideoMetadata`] record: codec normalization, HDR
//! classification, frame-rate/bit-depth resolution and immersive-audio
//! (Atmos / DTS:X) detection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::probe::{ProbeOutput, ProbeStream};

/// Normalized video codec vocabulary, serialized as the raw tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum VideoCodec {
    #[serde(rename = "h264")]
    #[sqlx(rename = "h264")]
    H264,
    #[serde(rename = "hevc")]
    #[sqlx(rename = "hevc")]
    Hevc,
    #[serde(rename = "vp9")]
    #[sqlx(rename = "vp9")]
    Vp9,
    #[serde(rename = "av1")]
    #[sqlx(rename = "av1")]
    Av1,
    #[serde(rename = "prores")]
    #[sqlx(rename = "prores")]
    Prores,
    #[serde(rename = "dnxhd")]
    #[sqlx(rename = "dnxhd")]
    Dnxhd,
    #[serde(rename = "mpeg2video")]
    #[sqlx(rename = "mpeg2video")]
    Mpeg2Video,
    #[serde(rename = "mpeg4")]
    #[sqlx(rename = "mpeg4")]
    Mpeg4,
    #[serde(rename = "vp8")]
    #[sqlx(rename = "vp8")]
    Vp8,
    #[serde(rename = "wmv3")]
    #[sqlx(rename = "wmv3")]
    Wmv3,
    #[serde(rename = "vc1")]
    #[sqlx(rename = "vc1")]
    Vc1,
    #[serde(rename = "mjpeg")]
    #[sqlx(rename = "mjpeg")]
    Mjpeg,
    #[serde(rename = "unknown")]
    #[sqlx(rename = "unknown")]
    Unknown,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
            VideoCodec::Prores => "prores",
            VideoCodec::Dnxhd => "dnxhd",
            VideoCodec::Mpeg2Video => "mpeg2video",
            VideoCodec::Mpeg4 => "mpeg4",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Wmv3 => "wmv3",
            VideoCodec::Vc1 => "vc1",
            VideoCodec::Mjpeg => "mjpeg",
            VideoCodec::Unknown => "unknown",
        }
    }

    /// Normalize an ffprobe `codec_name`, accepting common aliases.
    pub fn from_probe_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "h264" | "avc" | "avc1" => VideoCodec::H264,
            "hevc" | "h265" | "hev1" | "hvc1" | "dvhe" | "dvh1" => VideoCodec::Hevc,
            "vp9" => VideoCodec::Vp9,
            "av1" | "av01" => VideoCodec::Av1,
            "prores" => VideoCodec::Prores,
            "dnxhd" => VideoCodec::Dnxhd,
            "mpeg2video" | "mpeg2" => VideoCodec::Mpeg2Video,
            "mpeg4" | "mp4v" => VideoCodec::Mpeg4,
            "vp8" => VideoCodec::Vp8,
            "wmv3" => VideoCodec::Wmv3,
            "vc1" | "vc-1" => VideoCodec::Vc1,
            "mjpeg" | "mjpg" => VideoCodec::Mjpeg,
            _ => VideoCodec::Unknown,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized audio codec vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum AudioCodec {
    #[serde(rename = "aac")]
    #[sqlx(rename = "aac")]
    Aac,
    #[serde(rename = "ac3")]
    #[sqlx(rename = "ac3")]
    Ac3,
    #[serde(rename = "eac3")]
    #[sqlx(rename = "eac3")]
    Eac3,
    #[serde(rename = "truehd")]
    #[sqlx(rename = "truehd")]
    TrueHd,
    #[serde(rename = "dts")]
    #[sqlx(rename = "dts")]
    Dts,
    #[serde(rename = "dts-hd")]
    #[sqlx(rename = "dts-hd")]
    DtsHd,
    #[serde(rename = "flac")]
    #[sqlx(rename = "flac")]
    Flac,
    #[serde(rename = "opus")]
    #[sqlx(rename = "opus")]
    Opus,
    #[serde(rename = "vorbis")]
    #[sqlx(rename = "vorbis")]
    Vorbis,
    #[serde(rename = "mp3")]
    #[sqlx(rename = "mp3")]
    Mp3,
    #[serde(rename = "pcm")]
    #[sqlx(rename = "pcm")]
    Pcm,
    #[serde(rename = "alac")]
    #[sqlx(rename = "alac")]
    Alac,
    #[serde(rename = "wma")]
    #[sqlx(rename = "wma")]
    Wma,
    #[serde(rename = "unknown")]
    #[sqlx(rename = "unknown")]
    Unknown,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Eac3 => "eac3",
            AudioCodec::TrueHd => "truehd",
            AudioCodec::Dts => "dts",
            AudioCodec::DtsHd => "dts-hd",
            AudioCodec::Flac => "flac",
            AudioCodec::Opus => "opus",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Pcm => "pcm",
            AudioCodec::Alac => "alac",
            AudioCodec::Wma => "wma",
            AudioCodec::Unknown => "unknown",
        }
    }

    /// Normalize an ffprobe `codec_name`, consulting the profile to tell
    /// DTS core from DTS-HD (ffprobe reports both as codec "dts").
    pub fn from_probe_name(name: &str, profile: Option<&str>) -> Self {
        let name = name.to_lowercase();
        match name.as_str() {
            "aac" => AudioCodec::Aac,
            "ac3" | "ac-3" => AudioCodec::Ac3,
            "eac3" | "ec-3" => AudioCodec::Eac3,
            "truehd" => AudioCodec::TrueHd,
            "dts" => {
                let hd = profile
                    .map(|p| p.to_lowercase().contains("hd"))
                    .unwrap_or(false);
                if hd { AudioCodec::DtsHd } else { AudioCodec::Dts }
            }
            "flac" => AudioCodec::Flac,
            "opus" => AudioCodec::Opus,
            "vorbis" => AudioCodec::Vorbis,
            "mp3" | "mp3float" => AudioCodec::Mp3,
            "alac" => AudioCodec::Alac,
            _ if name.starts_with("pcm") => AudioCodec::Pcm,
            _ if name.starts_with("wma") => AudioCodec::Wma,
            _ => AudioCodec::Unknown,
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HDR classification.
///
/// `DolbyVisionHdr10` is a distinct variant rather than a flag combination:
/// a DV track with a PQ base layer plays as HDR10 on non-DV displays, which
/// is behaviorally different from a DV-only track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum HdrFormat {
    #[serde(rename = "sdr")]
    #[sqlx(rename = "sdr")]
    Sdr,
    #[serde(rename = "hdr10")]
    #[sqlx(rename = "hdr10")]
    Hdr10,
    #[serde(rename = "hdr10plus")]
    #[sqlx(rename = "hdr10plus")]
    Hdr10Plus,
    #[serde(rename = "dolby_vision")]
    #[sqlx(rename = "dolby_vision")]
    DolbyVision,
    #[serde(rename = "hlg")]
    #[sqlx(rename = "hlg")]
    Hlg,
    #[serde(rename = "dolby_vision_hdr10")]
    #[sqlx(rename = "dolby_vision_hdr10")]
    DolbyVisionHdr10,
}

impl HdrFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrFormat::Sdr => "sdr",
            HdrFormat::Hdr10 => "hdr10",
            HdrFormat::Hdr10Plus => "hdr10plus",
            HdrFormat::DolbyVision => "dolby_vision",
            HdrFormat::Hlg => "hlg",
            HdrFormat::DolbyVisionHdr10 => "dolby_vision_hdr10",
        }
    }
}

impl std::fmt::Display for HdrFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Container format vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum ContainerFormat {
    #[serde(rename = "mkv")]
    #[sqlx(rename = "mkv")]
    Mkv,
    #[serde(rename = "mp4")]
    #[sqlx(rename = "mp4")]
    Mp4,
    #[serde(rename = "mov")]
    #[sqlx(rename = "mov")]
    Mov,
    #[serde(rename = "avi")]
    #[sqlx(rename = "avi")]
    Avi,
    #[serde(rename = "wmv")]
    #[sqlx(rename = "wmv")]
    Wmv,
    #[serde(rename = "webm")]
    #[sqlx(rename = "webm")]
    Webm,
    #[serde(rename = "flv")]
    #[sqlx(rename = "flv")]
    Flv,
    #[serde(rename = "m4v")]
    #[sqlx(rename = "m4v")]
    M4v,
    #[serde(rename = "ts")]
    #[sqlx(rename = "ts")]
    Ts,
    #[serde(rename = "mts")]
    #[sqlx(rename = "mts")]
    Mts,
    #[serde(rename = "m2ts")]
    #[sqlx(rename = "m2ts")]
    M2ts,
    #[serde(rename = "vob")]
    #[sqlx(rename = "vob")]
    Vob,
    #[serde(rename = "mpg")]
    #[sqlx(rename = "mpg")]
    Mpg,
    #[serde(rename = "unknown")]
    #[sqlx(rename = "unknown")]
    Unknown,
}

impl ContainerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Wmv => "wmv",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Flv => "flv",
            ContainerFormat::M4v => "m4v",
            ContainerFormat::Ts => "ts",
            ContainerFormat::Mts => "mts",
            ContainerFormat::M2ts => "m2ts",
            ContainerFormat::Vob => "vob",
            ContainerFormat::Mpg => "mpg",
            ContainerFormat::Unknown => "unknown",
        }
    }

    /// Resolve the container from the probe's `format_name`, falling back
    /// to the file extension.
    ///
    /// ffprobe demuxer names are composite for some families
    /// ("matroska,webm", "mov,mp4,m4a,3gp,3g2,mj2"), so the extension
    /// disambiguates within a matched family.
    pub fn from_format_name(format_name: &str, extension: &str) -> Self {
        let name = format_name.to_lowercase();
        let ext = extension.to_lowercase();

        if name.contains("matroska") || name.contains("webm") {
            return if ext == "webm" {
                ContainerFormat::Webm
            } else {
                ContainerFormat::Mkv
            };
        }
        if name.contains("mp4") || name.contains("quicktime") || name.contains("mov") {
            return match ext.as_str() {
                "mov" => ContainerFormat::Mov,
                "m4v" => ContainerFormat::M4v,
                _ => ContainerFormat::Mp4,
            };
        }
        if name.contains("avi") {
            return ContainerFormat::Avi;
        }
        if name.contains("asf") {
            return ContainerFormat::Wmv;
        }
        if name.contains("flv") {
            return ContainerFormat::Flv;
        }
        if name.contains("mpegts") {
            return match ext.as_str() {
                "mts" => ContainerFormat::Mts,
                "m2ts" => ContainerFormat::M2ts,
                _ => ContainerFormat::Ts,
            };
        }
        if name.contains("mpeg") {
            return if ext == "vob" {
                ContainerFormat::Vob
            } else {
                ContainerFormat::Mpg
            };
        }

        Self::from_extension(&ext)
    }

    /// Map a bare file extension to a container.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_lowercase().as_str() {
            "mkv" => ContainerFormat::Mkv,
            "mp4" | "3gp" => ContainerFormat::Mp4,
            "mov" => ContainerFormat::Mov,
            "avi" | "divx" => ContainerFormat::Avi,
            "wmv" | "asf" => ContainerFormat::Wmv,
            "webm" => ContainerFormat::Webm,
            "flv" => ContainerFormat::Flv,
            "m4v" => ContainerFormat::M4v,
            "ts" => ContainerFormat::Ts,
            "mts" => ContainerFormat::Mts,
            "m2ts" => ContainerFormat::M2ts,
            "vob" => ContainerFormat::Vob,
            "mpg" | "mpeg" | "m2v" => ContainerFormat::Mpg,
            _ => ContainerFormat::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized metadata for one video file, ready for catalog insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub duration_seconds: Option<f64>,
    pub video_codec: VideoCodec,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,
    pub bit_depth: Option<i64>,
    pub hdr_format: HdrFormat,
    pub audio_codec: AudioCodec,
    pub audio_channels: Option<i64>,
    pub is_atmos: bool,
    pub is_dtsx: bool,
    pub container_format: ContainerFormat,
}

/// Interpret a probe report for the file at `path`.
///
/// Uses the first video stream (later video streams are typically embedded
/// cover art) and the first audio stream as the primary audio track.
pub fn parse(probe: &ProbeOutput, path: &Path, file_size: u64) -> VideoMetadata {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    let container_format = probe
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .map(|name| ContainerFormat::from_format_name(name, extension))
        .unwrap_or_else(|| ContainerFormat::from_extension(extension));

    let video_codec = video
        .and_then(|s| s.codec_name.as_deref())
        .map(VideoCodec::from_probe_name)
        .unwrap_or(VideoCodec::Unknown);

    let width = video
        .and_then(|s| s.width.or(s.coded_width))
        .filter(|w| *w > 0);
    let height = video
        .and_then(|s| s.height.or(s.coded_height))
        .filter(|h| *h > 0);

    // Stream bitrate when present, container bitrate otherwise.
    let bit_rate = video
        .and_then(|s| s.bit_rate.as_deref())
        .and_then(|b| b.parse::<i64>().ok())
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|f| f.bit_rate.as_deref())
                .and_then(|b| b.parse::<i64>().ok())
        });

    let frame_rate = video.and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    let bit_depth = video.and_then(resolve_bit_depth);
    let hdr_format = video
        .map(|s| classify_hdr(s, bit_depth))
        .unwrap_or(HdrFormat::Sdr);

    let audio_codec = audio
        .and_then(|s| {
            s.codec_name
                .as_deref()
                .map(|name| AudioCodec::from_probe_name(name, s.profile.as_deref()))
        })
        .unwrap_or(AudioCodec::Unknown);

    let audio_channels = audio.map(|s| infer_channels(s.channels, s.channel_layout.as_deref()));

    let is_atmos = audio
        .map(|s| detect_atmos(s, audio_codec, audio_channels.unwrap_or(0)))
        .unwrap_or(false);
    let is_dtsx = audio.map(|s| detect_dtsx(s, audio_codec)).unwrap_or(false);

    VideoMetadata {
        file_path: path.to_path_buf(),
        file_name,
        file_size,
        duration_seconds,
        video_codec,
        width,
        height,
        frame_rate,
        bit_rate,
        bit_depth,
        hdr_format,
        audio_codec,
        audio_channels,
        is_atmos,
        is_dtsx,
        container_format,
    }
}

/// Parse an ffprobe frame-rate string.
///
/// Rates come as a rational "num/den"; a zero denominator means the rate is
/// unknown. Plain floats are accepted as a fallback.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.trim().parse().ok()
}

/// Explicit bits-per-raw-sample first, pixel-format inference second.
fn resolve_bit_depth(stream: &ProbeStream) -> Option<i64> {
    if let Some(depth) = stream
        .bits_per_raw_sample
        .as_deref()
        .and_then(|b| b.parse::<i64>().ok())
    {
        return Some(depth);
    }

    let pix_fmt = stream.pix_fmt.as_deref()?;
    if pix_fmt.contains("10le") || pix_fmt.contains("10be") || pix_fmt.contains("p010") {
        Some(10)
    } else if pix_fmt.contains("12le") || pix_fmt.contains("12be") {
        Some(12)
    } else {
        None
    }
}

/// Priority-ordered HDR classification; the highest matching rule wins.
///
/// Bit depth alone is never evidence: 10-bit SDR masters exist. The
/// bit-depth guard only backs up a PQ transfer whose primaries metadata is
/// incomplete.
fn classify_hdr(stream: &ProbeStream, bit_depth: Option<i64>) -> HdrFormat {
    let transfer = stream
        .color_transfer
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let primaries = stream
        .color_primaries
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let side_types: Vec<String> = stream
        .side_data_list
        .iter()
        .flatten()
        .filter_map(|sd| sd.side_data_type.as_deref())
        .map(str::to_lowercase)
        .collect();

    let has_pq = transfer.contains("smpte2084") || transfer.contains("pq");

    // 1. Dolby Vision; a PQ base layer makes it the dual-layer DV+HDR10.
    if side_types
        .iter()
        .any(|t| t.contains("dolby vision") || t.contains("dovi"))
    {
        return if has_pq {
            HdrFormat::DolbyVisionHdr10
        } else {
            HdrFormat::DolbyVision
        };
    }

    // 2. HDR10+ dynamic metadata.
    if side_types
        .iter()
        .any(|t| t.contains("hdr10+") || t.contains("hdr dynamic metadata"))
    {
        return HdrFormat::Hdr10Plus;
    }

    // 3. HLG.
    if transfer.contains("arib-std-b67") || transfer.contains("hlg") {
        return HdrFormat::Hlg;
    }

    // 4. HDR10: PQ transfer plus wide-gamut primaries, or PQ plus >= 10-bit
    // when the primaries metadata is missing.
    let wide_gamut = primaries.contains("bt2020") || primaries.contains("2020");
    if has_pq && (wide_gamut || bit_depth.unwrap_or(0) >= 10) {
        return HdrFormat::Hdr10;
    }

    HdrFormat::Sdr
}

/// Channel count from the probe, with channel-layout inference fallback.
fn infer_channels(channels: Option<i64>, layout: Option<&str>) -> i64 {
    if let Some(count) = channels.filter(|c| *c > 0) {
        return count;
    }

    let layout = layout.unwrap_or_default().to_lowercase();
    if layout.contains("7.1") || layout.contains("octagonal") {
        8
    } else if layout.contains("5.1") || layout.contains("hexagonal") {
        6
    } else if layout.contains("quad") {
        4
    } else if layout.contains("stereo") {
        2
    } else if layout.contains("mono") {
        1
    } else {
        2
    }
}

/// Dolby Atmos detection for TrueHD / E-AC-3 primary tracks.
///
/// Explicit evidence (profile, codec long name, side data, track title) is
/// preferred; an 8-channel TrueHD bed without the flag is still treated as
/// Atmos since some masters omit the marker while carrying the bed.
fn detect_atmos(stream: &ProbeStream, codec: AudioCodec, channels: i64) -> bool {
    if !matches!(codec, AudioCodec::TrueHd | AudioCodec::Eac3) {
        return false;
    }

    let profile = stream.profile.as_deref().unwrap_or_default().to_lowercase();
    if profile.contains("atmos") {
        return true;
    }

    let long_name = stream
        .codec_long_name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    if long_name.contains("atmos") {
        return true;
    }

    let side_data_hit = stream
        .side_data_list
        .iter()
        .flatten()
        .filter_map(|sd| sd.side_data_type.as_deref())
        .map(str::to_lowercase)
        .any(|t| t.contains("atmos") || t.contains("dolby"));
    if side_data_hit {
        return true;
    }

    if stream_title(stream)
        .map(|t| t.to_lowercase().contains("atmos"))
        .unwrap_or(false)
    {
        return true;
    }

    codec == AudioCodec::TrueHd && channels >= 8
}

/// DTS:X detection for DTS / DTS-HD primary tracks.
///
/// Unlike Atmos there is no channel-count heuristic; explicit metadata is
/// required.
fn detect_dtsx(stream: &ProbeStream, codec: AudioCodec) -> bool {
    if !matches!(codec, AudioCodec::Dts | AudioCodec::DtsHd) {
        return false;
    }

    let profile = stream.profile.as_deref().unwrap_or_default().to_lowercase();
    if contains_dtsx_tag(&profile) {
        return true;
    }
    if profile.contains("dts-hd ma") && has_x_marker(&profile) {
        return true;
    }

    let long_name = stream
        .codec_long_name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    if contains_dtsx_tag(&long_name) {
        return true;
    }

    stream_title(stream)
        .map(|t| contains_dtsx_tag(&t.to_lowercase()))
        .unwrap_or(false)
}

fn contains_dtsx_tag(text: &str) -> bool {
    text.contains("dts:x") || text.contains("dts-x") || text.contains("dtsx")
}

/// True when the text carries a standalone "x" token, e.g. "DTS-HD MA X".
fn has_x_marker(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == "x")
}

fn stream_title(stream: &ProbeStream) -> Option<&str> {
    stream
        .tags
        .as_ref()
        .and_then(|tags| tags.get("title"))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::services::probe::{ProbeFormat, SideData};

    fn video_stream() -> ProbeStream {
        ProbeStream {
            codec_type: Some("video".to_string()),
            codec_name: Some("hevc".to_string()),
            width: Some(3840),
            height: Some(2160),
            ..Default::default()
        }
    }

    fn audio_stream(codec: &str) -> ProbeStream {
        ProbeStream {
            codec_type: Some("audio".to_string()),
            codec_name: Some(codec.to_string()),
            channels: Some(6),
            ..Default::default()
        }
    }

    fn side_data(entries: &[&str]) -> Option<Vec<SideData>> {
        Some(
            entries
                .iter()
                .map(|t| SideData {
                    side_data_type: Some(t.to_string()),
                })
                .collect(),
        )
    }

    fn probe_with(streams: Vec<ProbeStream>) -> ProbeOutput {
        ProbeOutput {
            format: Some(ProbeFormat {
                format_name: Some("matroska,webm".to_string()),
                duration: Some("5400.123".to_string()),
                bit_rate: Some("24000000".to_string()),
                ..Default::default()
            }),
            streams,
        }
    }

    #[test]
    fn test_video_codec_aliases() {
        assert_eq!(VideoCodec::from_probe_name("avc"), VideoCodec::H264);
        assert_eq!(VideoCodec::from_probe_name("h265"), VideoCodec::Hevc);
        assert_eq!(VideoCodec::from_probe_name("AV01"), VideoCodec::Av1);
        assert_eq!(VideoCodec::from_probe_name("mp4v"), VideoCodec::Mpeg4);
        assert_eq!(VideoCodec::from_probe_name("vc-1"), VideoCodec::Vc1);
        assert_eq!(VideoCodec::from_probe_name("mjpg"), VideoCodec::Mjpeg);
        assert_eq!(VideoCodec::from_probe_name("something"), VideoCodec::Unknown);
    }

    #[test]
    fn test_audio_codec_dts_profile_split() {
        assert_eq!(
            AudioCodec::from_probe_name("dts", Some("DTS-HD MA")),
            AudioCodec::DtsHd
        );
        assert_eq!(
            AudioCodec::from_probe_name("dts", Some("DTS")),
            AudioCodec::Dts
        );
        assert_eq!(AudioCodec::from_probe_name("dts", None), AudioCodec::Dts);
        assert_eq!(
            AudioCodec::from_probe_name("pcm_s24le", None),
            AudioCodec::Pcm
        );
        assert_eq!(AudioCodec::from_probe_name("wmapro", None), AudioCodec::Wma);
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(24000.0 / 1001.0));
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("23.976"), Some(23.976));
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_bit_depth_from_pix_fmt() {
        let mut s = video_stream();
        s.pix_fmt = Some("yuv420p10le".to_string());
        assert_eq!(resolve_bit_depth(&s), Some(10));

        s.pix_fmt = Some("yuv422p12be".to_string());
        assert_eq!(resolve_bit_depth(&s), Some(12));

        s.pix_fmt = Some("yuv420p".to_string());
        assert_eq!(resolve_bit_depth(&s), None);

        // Explicit field wins over the pixel format.
        s.bits_per_raw_sample = Some("10".to_string());
        s.pix_fmt = Some("yuv420p".to_string());
        assert_eq!(resolve_bit_depth(&s), Some(10));
    }

    #[test]
    fn test_container_resolution() {
        assert_eq!(
            ContainerFormat::from_format_name("matroska,webm", "mkv"),
            ContainerFormat::Mkv
        );
        assert_eq!(
            ContainerFormat::from_format_name("matroska,webm", "webm"),
            ContainerFormat::Webm
        );
        assert_eq!(
            ContainerFormat::from_format_name("mov,mp4,m4a,3gp,3g2,mj2", "mp4"),
            ContainerFormat::Mp4
        );
        assert_eq!(
            ContainerFormat::from_format_name("mov,mp4,m4a,3gp,3g2,mj2", "mov"),
            ContainerFormat::Mov
        );
        assert_eq!(
            ContainerFormat::from_format_name("mpegts", "m2ts"),
            ContainerFormat::M2ts
        );
        // Unrecognized format name falls back to the extension.
        assert_eq!(
            ContainerFormat::from_format_name("weird", "avi"),
            ContainerFormat::Avi
        );
        assert_eq!(
            ContainerFormat::from_format_name("weird", "xyz"),
            ContainerFormat::Unknown
        );
    }

    #[test]
    fn test_hdr10_requires_pq_and_wide_gamut() {
        let mut s = video_stream();
        s.color_transfer = Some("smpte2084".to_string());
        s.color_primaries = Some("bt2020nc".to_string());
        assert_eq!(classify_hdr(&s, Some(10)), HdrFormat::Hdr10);

        // 10-bit SDR: bit depth alone is not evidence.
        let mut sdr = video_stream();
        sdr.color_transfer = Some("bt709".to_string());
        sdr.color_primaries = Some("bt709".to_string());
        assert_eq!(classify_hdr(&sdr, Some(10)), HdrFormat::Sdr);

        // PQ with missing primaries but 10-bit depth still counts.
        let mut partial = video_stream();
        partial.color_transfer = Some("smpte2084".to_string());
        assert_eq!(classify_hdr(&partial, Some(10)), HdrFormat::Hdr10);
        assert_eq!(classify_hdr(&partial, Some(8)), HdrFormat::Sdr);
    }

    #[test]
    fn test_hlg_classification() {
        let mut s = video_stream();
        s.color_transfer = Some("arib-std-b67".to_string());
        assert_eq!(classify_hdr(&s, None), HdrFormat::Hlg);
    }

    #[test]
    fn test_dolby_vision_priority() {
        // DV side data with a PQ base layer is the dual-layer variant.
        let mut s = video_stream();
        s.color_transfer = Some("smpte2084".to_string());
        s.color_primaries = Some("bt2020nc".to_string());
        s.side_data_list = side_data(&["DOVI configuration record"]);
        assert_eq!(classify_hdr(&s, Some(10)), HdrFormat::DolbyVisionHdr10);

        // Same side data over an SDR base layer is plain Dolby Vision.
        let mut dv = video_stream();
        dv.color_transfer = Some("bt709".to_string());
        dv.side_data_list = side_data(&["DOVI configuration record"]);
        assert_eq!(classify_hdr(&dv, None), HdrFormat::DolbyVision);

        // DV outranks HDR10+ when both are present.
        let mut both = video_stream();
        both.color_transfer = Some("smpte2084".to_string());
        both.side_data_list = side_data(&[
            "HDR Dynamic Metadata SMPTE2094-40 (HDR10+)",
            "Dolby Vision Metadata",
        ]);
        assert_eq!(classify_hdr(&both, Some(10)), HdrFormat::DolbyVisionHdr10);
    }

    #[test]
    fn test_hdr10_plus_classification() {
        let mut s = video_stream();
        s.color_transfer = Some("smpte2084".to_string());
        s.color_primaries = Some("bt2020nc".to_string());
        s.side_data_list = side_data(&["HDR Dynamic Metadata SMPTE2094-40 (HDR10+)"]);
        assert_eq!(classify_hdr(&s, Some(10)), HdrFormat::Hdr10Plus);
    }

    #[test]
    fn test_channel_inference() {
        assert_eq!(infer_channels(Some(8), None), 8);
        assert_eq!(infer_channels(None, Some("7.1")), 8);
        assert_eq!(infer_channels(None, Some("octagonal")), 8);
        assert_eq!(infer_channels(None, Some("5.1(side)")), 6);
        assert_eq!(infer_channels(None, Some("stereo")), 2);
        assert_eq!(infer_channels(None, Some("mono")), 1);
        assert_eq!(infer_channels(None, Some("quad")), 4);
        assert_eq!(infer_channels(None, None), 2);
    }

    #[test]
    fn test_atmos_explicit_profile() {
        let mut s = audio_stream("truehd");
        s.profile = Some("Dolby TrueHD + Dolby Atmos".to_string());
        assert!(detect_atmos(&s, AudioCodec::TrueHd, 6));
    }

    #[test]
    fn test_atmos_channel_heuristic() {
        // TrueHD with an 8-channel bed and no explicit marker.
        let mut s = audio_stream("truehd");
        s.channels = Some(8);
        s.codec_long_name = Some("TrueHD".to_string());
        assert!(detect_atmos(&s, AudioCodec::TrueHd, 8));

        // The heuristic does not apply to E-AC-3.
        let e = audio_stream("eac3");
        assert!(!detect_atmos(&e, AudioCodec::Eac3, 8));

        // Nor to a 6-channel TrueHD track.
        assert!(!detect_atmos(&audio_stream("truehd"), AudioCodec::TrueHd, 6));
    }

    #[test]
    fn test_atmos_wrong_codec_rejected() {
        let mut s = audio_stream("aac");
        s.profile = Some("Atmos".to_string());
        assert!(!detect_atmos(&s, AudioCodec::Aac, 8));
    }

    #[test]
    fn test_dtsx_detection() {
        let mut s = audio_stream("dts");
        s.profile = Some("DTS-HD MA + DTS:X".to_string());
        assert!(detect_dtsx(&s, AudioCodec::DtsHd));

        let mut marker = audio_stream("dts");
        marker.profile = Some("DTS-HD MA X".to_string());
        assert!(detect_dtsx(&marker, AudioCodec::DtsHd));

        let mut plain = audio_stream("dts");
        plain.profile = Some("DTS-HD MA".to_string());
        assert!(!detect_dtsx(&plain, AudioCodec::DtsHd));

        // No channel heuristic for DTS:X.
        let mut wide = audio_stream("dts");
        wide.channels = Some(8);
        assert!(!detect_dtsx(&wide, AudioCodec::DtsHd));

        // Wrong codec family never qualifies.
        let mut truehd = audio_stream("truehd");
        truehd.profile = Some("DTS:X".to_string());
        assert!(!detect_dtsx(&truehd, AudioCodec::TrueHd));
    }

    #[test]
    fn test_parse_4k_hdr10_file() {
        let mut video = video_stream();
        video.color_transfer = Some("smpte2084".to_string());
        video.color_primaries = Some("bt2020nc".to_string());
        video.bits_per_raw_sample = Some("10".to_string());
        video.avg_frame_rate = Some("24000/1001".to_string());
        video.bit_rate = Some("18000000".to_string());

        let mut audio = audio_stream("truehd");
        audio.channels = Some(8);

        let probe = probe_with(vec![video, audio]);
        let meta = parse(&probe, Path::new("/library/film.mkv"), 4_000_000_000);

        assert_eq!(meta.video_codec, VideoCodec::Hevc);
        assert_eq!(meta.hdr_format, HdrFormat::Hdr10);
        assert_eq!(meta.width, Some(3840));
        assert_eq!(meta.height, Some(2160));
        assert_eq!(meta.bit_depth, Some(10));
        assert_eq!(meta.bit_rate, Some(18_000_000));
        assert_eq!(meta.container_format, ContainerFormat::Mkv);
        assert_eq!(meta.audio_codec, AudioCodec::TrueHd);
        assert_eq!(meta.audio_channels, Some(8));
        assert!(meta.is_atmos);
        assert!(!meta.is_dtsx);
        assert_eq!(meta.file_name, "film.mkv");
        assert_eq!(meta.file_size, 4_000_000_000);
        assert!((meta.duration_seconds.unwrap() - 5400.123).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ignores_cover_art_stream() {
        // First video stream wins; a later mjpeg attachment is ignored.
        let cover = ProbeStream {
            codec_type: Some("video".to_string()),
            codec_name: Some("mjpeg".to_string()),
            width: Some(600),
            height: Some(900),
            ..Default::default()
        };

        let probe = probe_with(vec![video_stream(), cover]);
        let meta = parse(&probe, Path::new("/library/film.mkv"), 1);
        assert_eq!(meta.video_codec, VideoCodec::Hevc);
        assert_eq!(meta.height, Some(2160));
    }

    #[test]
    fn test_parse_container_bitrate_fallback() {
        let probe = probe_with(vec![video_stream()]);
        let meta = parse(&probe, Path::new("/library/film.mkv"), 1);
        assert_eq!(meta.bit_rate, Some(24_000_000));
    }

    #[test]
    fn test_parse_no_audio_stream() {
        let probe = probe_with(vec![video_stream()]);
        let meta = parse(&probe, Path::new("/library/film.mkv"), 1);
        assert_eq!(meta.audio_codec, AudioCodec::Unknown);
        assert!(!meta.is_atmos);
        assert!(!meta.is_dtsx);
    }

    #[test]
    fn test_title_tag_evidence() {
        let mut s = audio_stream("eac3");
        let mut tags = HashMap::new();
        tags.insert("title".to_string(), "English 5.1 Atmos".to_string());
        s.tags = Some(tags);
        assert!(detect_atmos(&s, AudioCodec::Eac3, 6));
    }
}
