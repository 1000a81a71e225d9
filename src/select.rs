//! Narrowing a video's format list down to the streams worth downloading.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::metadata::{FormatDescriptor, MediaKind};

/// Optional criteria applied on top of the media kind. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatFilter {
    /// Compared case-insensitively against the quality label.
    pub quality: Option<String>,
    /// Case-insensitive substring of the MIME type, e.g. `mp4` or `video/webm`.
    pub mime_type: Option<String>,
    /// Compared case-insensitively against the language tag.
    pub language: Option<String>,
    /// Exact channel count.
    pub audio_channels: Option<u32>,
}

impl FormatFilter {
    /// Video streams without embedded audio, so the merged file ends up with
    /// a single audio track.
    pub fn video_only() -> Self {
        Self {
            audio_channels: Some(0),
            ..Self::default()
        }
    }

    fn matches(&self, format: &FormatDescriptor) -> bool {
        if let Some(quality) = non_empty(&self.quality)
            && !format.quality_label.eq_ignore_ascii_case(quality)
        {
            return false;
        }
        if let Some(mime) = non_empty(&self.mime_type)
            && !format
                .mime_type
                .to_ascii_lowercase()
                .contains(&mime.to_ascii_lowercase())
        {
            return false;
        }
        if let Some(language) = non_empty(&self.language)
            && !format.language.eq_ignore_ascii_case(language)
        {
            return false;
        }
        if let Some(channels) = self.audio_channels
            && format.audio_channels != channels
        {
            return false;
        }
        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Returns the formats of `kind` that pass `filter`, best first.
pub fn select_formats(
    formats: &[FormatDescriptor],
    kind: MediaKind,
    filter: &FormatFilter,
) -> Vec<FormatDescriptor> {
    let mut selected: Vec<FormatDescriptor> = formats
        .iter()
        .filter(|format| format.kind == kind && filter.matches(format))
        .cloned()
        .collect();
    sort_formats(&mut selected);
    selected
}

/// Orders formats from most to least preferred: resolution, frame rate,
/// bitrate, then mp4 containers, then itag for a stable tie-break.
pub fn sort_formats(formats: &mut [FormatDescriptor]) {
    formats.sort_by(compare_preference);
}

fn compare_preference(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
    b.height
        .cmp(&a.height)
        .then_with(|| b.fps.cmp(&a.fps))
        .then_with(|| b.bitrate.cmp(&a.bitrate))
        .then_with(|| is_mp4(b).cmp(&is_mp4(a)))
        .then_with(|| a.itag.cmp(&b.itag))
}

fn is_mp4(format: &FormatDescriptor) -> bool {
    format.mime_type.contains("/mp4")
}

/// The top-ranked match, or [`Error::NoFormat`] when nothing passes.
pub fn best_format(
    formats: &[FormatDescriptor],
    kind: MediaKind,
    filter: &FormatFilter,
) -> Result<FormatDescriptor> {
    select_formats(formats, kind, filter)
        .into_iter()
        .next()
        .ok_or(Error::NoFormat { kind })
}
