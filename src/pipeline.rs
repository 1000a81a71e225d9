//! The `down` flow: metadata, format choice, two downloads, one merge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::download::{DownloadTask, Downloader};
use crate::error::{Error, Result};
use crate::merge::Merger;
use crate::metadata::{FormatDescriptor, MediaKind, VideoMetadata, extension_for_mime, format_duration};
use crate::provider::{Provider, parse_video_id};
use crate::select::select_formats;
use crate::slug::output_file_name;

/// Picks one of the ranked candidates for a media kind.
pub trait FormatChooser: Send + Sync {
    /// Returns an index into `candidates`, which is never empty and is
    /// ordered best first.
    fn choose(
        &self,
        kind: MediaKind,
        video: &VideoMetadata,
        candidates: &[FormatDescriptor],
    ) -> Result<usize>;
}

/// Always takes the top-ranked candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFormat;

impl FormatChooser for BestFormat {
    fn choose(&self, _: MediaKind, _: &VideoMetadata, _: &[FormatDescriptor]) -> Result<usize> {
        Ok(0)
    }
}

/// Scratch files for the two streams and the merged destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub temp_video: PathBuf,
    pub temp_audio: PathBuf,
    pub final_output: PathBuf,
}

impl OutputPaths {
    pub fn resolve(
        settings: &Settings,
        video: &VideoMetadata,
        video_format: &FormatDescriptor,
        audio_format: &FormatDescriptor,
    ) -> Self {
        let file_name = output_file_name(settings.output_name.as_deref(), &video.title, &video.id);
        Self {
            temp_video: settings
                .temp_dir
                .join(format!("video.{}", extension_for_mime(&video_format.mime_type))),
            temp_audio: settings
                .temp_dir
                .join(format!("audio.{}", extension_for_mime(&audio_format.mime_type))),
            final_output: settings.output_dir.join(file_name),
        }
    }
}

pub struct Pipeline {
    provider: Arc<dyn Provider>,
    merger: Arc<dyn Merger>,
    chooser: Box<dyn FormatChooser>,
    settings: Settings,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn Provider>, merger: Arc<dyn Merger>, settings: Settings) -> Self {
        Self {
            provider,
            merger,
            chooser: Box::new(BestFormat),
            settings,
        }
    }

    pub fn with_chooser(mut self, chooser: Box<dyn FormatChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Downloads the video behind `url` and returns the merged file's path.
    pub async fn run(&self, cancel: &CancellationToken, url: &str) -> Result<PathBuf> {
        let video_id = parse_video_id(url)?;
        info!(video_id = %video_id, provider = self.provider.name(), "fetching video metadata");

        let video = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            video = self.provider.video_metadata(&video_id) => video?,
        };
        info!(
            title = %video.title,
            author = %video.author,
            duration = %format_duration(video.duration),
            formats = video.formats.len(),
            "video metadata"
        );

        let video_candidates = select_formats(&video.formats, MediaKind::Video, &self.settings.video_filter);
        let audio_candidates = select_formats(&video.formats, MediaKind::Audio, &self.settings.audio_filter);
        if video_candidates.is_empty() {
            return Err(Error::NoFormat { kind: MediaKind::Video });
        }
        if audio_candidates.is_empty() {
            return Err(Error::NoFormat { kind: MediaKind::Audio });
        }

        let video_format = self.pick(MediaKind::Video, &video, &video_candidates)?;
        let audio_format = self.pick(MediaKind::Audio, &video, &audio_candidates)?;
        info!(
            video_itag = video_format.itag,
            video_quality = %video_format.quality_label,
            audio_itag = audio_format.itag,
            audio_quality = %audio_format.quality_label,
            "formats selected"
        );

        let paths = OutputPaths::resolve(&self.settings, &video, video_format, audio_format);
        if !self.settings.overwrite && tokio::fs::try_exists(&paths.final_output).await.unwrap_or(false) {
            return Err(Error::Input(format!(
                "{} already exists (use --overwrite to replace it)",
                paths.final_output.display()
            )));
        }
        create_dir(&self.settings.temp_dir).await?;
        create_dir(&self.settings.output_dir).await?;

        let downloader = Downloader::new(Arc::clone(&self.provider), self.settings.progress);
        for (format, destination) in [
            (video_format, &paths.temp_video),
            (audio_format, &paths.temp_audio),
        ] {
            let task = DownloadTask {
                video: &video,
                format,
                destination: destination.clone(),
            };
            downloader.run(cancel, &task).await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            merged = self.merger.merge(&paths.temp_video, &paths.temp_audio, &paths.final_output) => merged?,
        }

        for temp in [&paths.temp_video, &paths.temp_audio] {
            if let Err(err) = tokio::fs::remove_file(temp).await {
                warn!(path = %temp.display(), error = %err, "could not remove temporary file");
            }
        }

        info!(path = %paths.final_output.display(), "download complete");
        Ok(paths.final_output)
    }

    fn pick<'a>(
        &self,
        kind: MediaKind,
        video: &VideoMetadata,
        candidates: &'a [FormatDescriptor],
    ) -> Result<&'a FormatDescriptor> {
        let index = self.chooser.choose(kind, video, candidates)?;
        candidates
            .get(index)
            .ok_or_else(|| Error::Input(format!("no {kind} format at position {index}")))
    }
}

async fn create_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| Error::io(dir, err))
}
