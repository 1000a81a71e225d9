//! Video and stream descriptions handed around by the pipeline.
//!
//! The provider speaks loosely typed JSON where almost every field is
//! optional. Everything is resolved here, once, into concrete values so the
//! selector, downloader and merger never have to second-guess missing data.
//! The raw payload structs mirror `yt-dlp --dump-single-json` and only keep the
//! fields we actually read.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Whether a stream carries pictures or sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size of a stream in bytes, and how much we trust it.
///
/// `Estimated` covers both the provider's own approximation and our
/// `bitrate * duration / 8` fallback. Progress output marks it as approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    Exact(u64),
    Estimated(u64),
    Unknown,
}

impl ContentLength {
    /// Byte count, if any is known or estimated.
    pub fn bytes(self) -> Option<u64> {
        match self {
            ContentLength::Exact(n) | ContentLength::Estimated(n) => Some(n),
            ContentLength::Unknown => None,
        }
    }

    pub fn is_estimated(self) -> bool {
        matches!(self, ContentLength::Estimated(_))
    }

    /// Builds an estimate from a bitrate in bits per second.
    pub fn estimate(bitrate: u64, duration: Duration) -> Self {
        let bytes = (bitrate as f64 * duration.as_secs_f64() / 8.0) as u64;
        if bytes == 0 {
            ContentLength::Unknown
        } else {
            ContentLength::Estimated(bytes)
        }
    }
}

/// One downloadable stream variant.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    /// Provider-assigned numeric tag, unique within one video.
    pub itag: u32,
    pub kind: MediaKind,
    /// `1080p60` for video, a tier such as `medium` or `128k` for audio.
    pub quality_label: String,
    /// Bits per second.
    pub bitrate: u64,
    /// Zero for audio.
    pub fps: u32,
    /// Zero for audio.
    pub height: u32,
    pub mime_type: String,
    pub content_length: ContentLength,
    /// Empty when the provider does not tag the track.
    pub language: String,
    /// Zero for video-only streams.
    pub audio_channels: u32,
    /// Where the provider fetches the bytes from.
    pub url: String,
    pub http_headers: BTreeMap<String, String>,
}

/// Everything we know about a single video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration: Duration,
    pub formats: Vec<FormatDescriptor>,
}

impl VideoMetadata {
    pub fn format_by_itag(&self, itag: u32) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|format| format.itag == itag)
    }

    /// Ingests a `yt-dlp` info payload, dropping formats we cannot describe.
    pub fn from_info(info: RawVideoInfo) -> Self {
        let duration = info
            .duration
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default();

        let author = info
            .channel
            .or(info.uploader)
            .filter(|name| !name.is_empty())
            .unwrap_or_default();
        let title = info
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| info.id.clone());

        let formats = info
            .formats
            .into_iter()
            .filter_map(|raw| FormatDescriptor::from_raw(raw, duration))
            .collect();

        Self {
            id: info.id,
            title,
            author,
            duration,
            formats,
        }
    }
}

/// Subset of `yt-dlp --dump-single-json`.
#[derive(Debug, Deserialize)]
pub struct RawVideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// `https`, `m3u8_native`, `http_dash_segments`, ...
    pub protocol: Option<String>,
    pub format_note: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub vbr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub audio_channels: Option<u32>,
    pub language: Option<String>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

impl FormatDescriptor {
    fn from_raw(raw: RawFormat, duration: Duration) -> Option<Self> {
        let format_id = raw.format_id.as_deref().unwrap_or_default().trim();
        let Ok(itag) = format_id.parse::<u32>() else {
            debug!(format_id, "skipping format without a numeric id");
            return None;
        };
        let Some(url) = raw.url.filter(|url| !url.is_empty()) else {
            debug!(itag, "skipping format without a stream url");
            return None;
        };
        // Playlists and segmented protocols would be saved as manifest text.
        if let Some(protocol) = raw.protocol.as_deref()
            && !matches!(protocol, "https" | "http")
        {
            debug!(itag, protocol, "skipping format that is not a plain HTTP download");
            return None;
        }

        let has_video = codec_present(raw.vcodec.as_deref());
        let has_audio = codec_present(raw.acodec.as_deref());
        let kind = match (has_video, has_audio) {
            (true, _) => MediaKind::Video,
            (false, true) => MediaKind::Audio,
            (false, false) => {
                debug!(itag, "skipping format with neither audio nor video");
                return None;
            }
        };

        let kbps = raw.tbr.or(raw.vbr).or(raw.abr).unwrap_or_default();
        let bitrate = (kbps.max(0.0) * 1000.0) as u64;

        let content_length = match (raw.filesize, raw.filesize_approx) {
            (Some(size), _) if size > 0 => ContentLength::Exact(size),
            (_, Some(size)) if size > 0 => ContentLength::Estimated(size),
            _ => ContentLength::estimate(bitrate, duration),
        };

        let ext = raw.ext.as_deref().unwrap_or("mp4");
        let codec = match kind {
            MediaKind::Video => raw.vcodec.as_deref(),
            MediaKind::Audio => raw.acodec.as_deref(),
        };
        let mime_type = mime_type_for(kind, ext, codec);

        let height = if kind == MediaKind::Video {
            raw.height.unwrap_or_default()
        } else {
            0
        };
        let fps = if kind == MediaKind::Video {
            raw.fps.unwrap_or_default().round().max(0.0) as u32
        } else {
            0
        };
        let quality_label = quality_label(kind, raw.format_note.as_deref(), height, fps, kbps);

        // Muxed streams rarely report a channel count; assume stereo.
        let audio_channels = if has_audio {
            raw.audio_channels.unwrap_or(2)
        } else {
            0
        };

        Some(Self {
            itag,
            kind,
            quality_label,
            bitrate,
            fps,
            height,
            mime_type,
            content_length,
            language: raw.language.unwrap_or_default(),
            audio_channels,
            url,
            http_headers: raw.http_headers,
        })
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
}

fn quality_label(
    kind: MediaKind,
    note: Option<&str>,
    height: u32,
    fps: u32,
    kbps: f64,
) -> String {
    match kind {
        MediaKind::Video if height > 0 && fps > 30 => format!("{height}p{fps}"),
        MediaKind::Video if height > 0 => format!("{height}p"),
        MediaKind::Audio if kbps > 0.0 => format!("{}k", kbps.round() as u64),
        _ => note.unwrap_or_default().to_owned(),
    }
}

/// Builds a MIME type such as `video/mp4; codecs="avc1.640028"`.
fn mime_type_for(kind: MediaKind, ext: &str, codec: Option<&str>) -> String {
    let ext = ext.to_ascii_lowercase();
    let essence = match (kind, ext.as_str()) {
        (MediaKind::Audio, "m4a" | "mp4") => "audio/mp4".to_owned(),
        (MediaKind::Audio, "webm") => "audio/webm".to_owned(),
        (MediaKind::Video, "mp4") => "video/mp4".to_owned(),
        (MediaKind::Video, "webm") => "video/webm".to_owned(),
        (kind, ext) => mime_guess::from_ext(ext)
            .first_raw()
            .filter(|guess| guess.starts_with(kind.as_str()))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{kind}/{ext}")),
    };

    match codec.filter(|codec| codec_present(Some(codec))) {
        Some(codec) => format!("{essence}; codecs=\"{codec}\""),
        None => essence,
    }
}

/// File extension to use for a stream of the given MIME type.
pub fn extension_for_mime(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence == "audio/mp4" {
        return "m4a".to_owned();
    }

    let subtype = essence.split('/').nth(1).unwrap_or_default();
    match mime_guess::get_mime_extensions_str(&essence) {
        Some(exts) if exts.contains(&subtype) => subtype.to_owned(),
        Some([first, ..]) => (*first).to_owned(),
        _ => "bin".to_owned(),
    }
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Megabytes with two decimals, `~` prefixed for estimates.
pub fn format_size(length: ContentLength) -> String {
    match length {
        ContentLength::Exact(bytes) => format!("{:.2} MB", bytes as f64 / 1_048_576.0),
        ContentLength::Estimated(bytes) => format!("~{:.2} MB", bytes as f64 / 1_048_576.0),
        ContentLength::Unknown => "?".to_owned(),
    }
}
